#![doc = include_str!("../README.md")]
#![deny(unsafe_code, missing_docs)]

pub mod config;
pub mod conn;
pub mod dial;
pub mod error;
pub mod listener;
pub mod socket;

mod demux;
mod entry;
mod registry;

pub use config::Config;
pub use conn::{Conn, Connection};
pub use dial::{dial, dial_udp, dial_udp_with};
pub use error::Error;
pub use listener::{listen, Listener, StreamListener};
pub use socket::PacketSocket;
