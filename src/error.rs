//! Error types for the streamux crate.

use thiserror::Error;

/// Errors surfaced across the connection and listener API boundary.
///
/// Transient conditions (no data yet, overflow drops, receive-loop hiccups)
/// are handled internally and never appear here; only invalid-state and
/// end-of-stream cross the boundary, plus socket errors from the write path.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted on a connection or listener after close.
    #[error("use of closed connection")]
    Closed,
    /// The peer went silent past the dead interval; terminal for this peer.
    #[error("peer disconnected")]
    Disconnected,
    /// Network kind not handled by either the packet or stream path.
    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),
    /// Inconsistent tuning parameters.
    #[error("invalid config: {0}")]
    Config(&'static str),
    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Closed => std::io::Error::new(std::io::ErrorKind::NotConnected, e),
            Error::Disconnected => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e),
            Error::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidInput, other),
        }
    }
}
