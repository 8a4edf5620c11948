//! Dialing a single remote peer over a dedicated packet socket.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::conn::{Conn, Connection, ReadSource};
use crate::demux;
use crate::entry::Entry;
use crate::error::Error;
use crate::socket::PacketSocket;

/// Dial the UDP peer at `addr` with the default [`Config`].
pub fn dial_udp<A: ToSocketAddrs>(addr: A) -> Result<Conn, Error> {
    dial_udp_with(addr, Config::default())
}

/// Dial the UDP peer at `addr` with explicit tuning parameters.
///
/// Opens a dedicated socket connected to the peer and returns a ready
/// connection immediately; there is no handshake. Because the socket serves
/// exactly one peer, inbound datagrams feed a private entry directly with no
/// address-keyed demultiplexing.
pub fn dial_udp_with<A: ToSocketAddrs>(addr: A, cfg: Config) -> Result<Conn, Error> {
    cfg.validate()?;
    let remote = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"))?;

    let local: SocketAddr = if remote.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local)?;
    socket.connect(remote)?;
    let socket: Arc<dyn PacketSocket> = Arc::new(socket);
    // The private read loop wakes at least once per heartbeat interval to
    // observe shutdown.
    socket.set_read_timeout(Some(cfg.heartbeat))?;

    let entry = Arc::new(Entry::new(cfg.queue_capacity));
    let conn = Conn::new(
        ReadSource::Private {
            entry: entry.clone(),
            hung_up: AtomicBool::new(false),
        },
        socket.clone(),
        None,
        cfg.clone(),
    );

    let closed = conn.shutdown_signal();
    thread::spawn(move || {
        let mut buf = vec![0u8; cfg.recv_buffer];
        loop {
            if demux::shut_down(&closed) {
                return;
            }
            match socket.recv(&mut buf) {
                Ok(n) => {
                    if !entry.push(&buf[..n]) {
                        tracing::trace!(n, "inbound queue full, datagram dropped");
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::trace!(error = %e, "receive error, continuing");
                }
            }
        }
    });

    Ok(conn)
}

/// Dial `addr`, selecting the packet implementation for datagram network
/// kinds and the native stream implementation otherwise.
pub fn dial(network: &str, addr: &str) -> Result<Box<dyn Connection>, Error> {
    match network {
        "udp" | "udp4" | "udp6" => Ok(Box::new(dial_udp(addr)?)),
        "tcp" | "tcp4" | "tcp6" => Ok(Box::new(TcpStream::connect(addr)?)),
        other => Err(Error::UnsupportedNetwork(other.to_string())),
    }
}
