//! The packet socket capability.
//!
//! The core treats the underlying transport as a capability, not a concrete
//! socket type: anything that can send and receive discrete, possibly lossy
//! datagrams works as a backend. UDP is provided; raw-IP or other datagram
//! backends can implement [`PacketSocket`] at this boundary without touching
//! the demultiplexing or liveness machinery.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Best-effort datagram transport used underneath the stream layer.
///
/// Delivery may be lossy, duplicated or reordered; the stream layer passes
/// that through unchanged. `recv`/`send` are the connected-mode variants
/// used by dialed sockets, `recv_from`/`send_to` the address-qualified ones
/// used by a shared listening socket.
pub trait PacketSocket: Send + Sync {
    /// Receive one datagram along with its source address.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    /// Receive one datagram on a connected socket.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Send one datagram to the given address.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    /// Send one datagram on a connected socket.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;
    /// Local bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// Remote address of a connected socket.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    /// Bound the blocking time of `recv`/`recv_from` so background receive
    /// loops can observe shutdown.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl PacketSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::peer_addr(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout)
    }
}
