//! Accepting stream connections from a shared packet socket.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::conn::{Conn, Connection};
use crate::demux;
use crate::error::Error;
use crate::registry::Registry;
use crate::socket::PacketSocket;

/// A listener multiplexing many peer streams over one packet socket.
///
/// The listener owns the socket and the peer registry; the background
/// demultiplexer routes datagrams into per-peer queues and surfaces each new
/// source address exactly once through [`Listener::accept`].
pub struct Listener {
    socket: Arc<dyn PacketSocket>,
    registry: Arc<Registry>,
    accept_rx: Receiver<Conn>,
    closed: Receiver<()>,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl Listener {
    /// Bind a UDP socket on `addr` and start demultiplexing with the
    /// default [`Config`].
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        Self::bind_with(addr, Config::default())
    }

    /// Bind a UDP socket on `addr` with explicit tuning parameters.
    pub fn bind_with<A: ToSocketAddrs>(addr: A, cfg: Config) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        Self::from_socket(Arc::new(socket), cfg)
    }

    /// Start demultiplexing on an already-constructed packet socket.
    ///
    /// This is the entry point for non-UDP backends implementing
    /// [`PacketSocket`].
    pub fn from_socket(socket: Arc<dyn PacketSocket>, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        // The receive loop wakes at least once per heartbeat interval to
        // observe shutdown.
        socket.set_read_timeout(Some(cfg.heartbeat))?;

        let registry = Arc::new(Registry::new(cfg.queue_capacity));
        let (accept_tx, accept_rx) = bounded(cfg.accept_backlog);
        let (shutdown_tx, closed) = bounded::<()>(0);

        demux::spawn(
            socket.clone(),
            registry.clone(),
            accept_tx,
            closed.clone(),
            cfg,
        );

        Ok(Self {
            socket,
            registry,
            accept_rx,
            closed,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Block until a new peer is observed on the socket, yielding its
    /// stream connection. Fails with [`Error::Closed`] once the listener is
    /// closed.
    pub fn accept(&self) -> Result<Conn, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        select! {
            recv(self.accept_rx) -> conn => conn.map_err(|_| Error::Closed),
            recv(self.closed) -> _ => Err(Error::Closed),
        }
    }

    /// Bound local address of the shared socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shut the listener down. Idempotent.
    ///
    /// Wakes any blocked [`Listener::accept`] and stops the receive loop.
    /// Connections already accepted keep draining their queued bytes until
    /// individually evicted by dead-peer detection, and they keep a handle
    /// on the shared socket, so the local port is released only after all
    /// accepted connections close.
    pub fn close(&self) {
        self.shutdown.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.shutdown.lock().is_none()
    }

    /// Number of peers currently tracked by the registry.
    pub fn peers(&self) -> usize {
        self.registry.len()
    }
}

/// The listener contract exposed to application code, mirroring
/// [`Connection`]: implemented by [`Listener`] for packet transports and by
/// [`TcpListener`] for the native stream pass-through.
pub trait StreamListener: Send {
    /// Block until the next inbound connection.
    fn accept(&self) -> io::Result<Box<dyn Connection>>;
    /// Bound local address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// Stop accepting connections.
    fn close(&self) -> io::Result<()>;
}

impl StreamListener for Listener {
    fn accept(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(Listener::accept(self)?))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Listener::local_addr(self)
    }

    fn close(&self) -> io::Result<()> {
        Listener::close(self);
        Ok(())
    }
}

impl StreamListener for TcpListener {
    fn accept(&self) -> io::Result<Box<dyn Connection>> {
        let (stream, _) = TcpListener::accept(self)?;
        Ok(Box::new(stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    // The native listener has no soft shutdown; the socket closes on drop.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Listen on `addr`, selecting the packet-demultiplexing implementation for
/// datagram network kinds and the native stream implementation otherwise.
pub fn listen(network: &str, addr: &str) -> Result<Box<dyn StreamListener>, Error> {
    match network {
        "udp" | "udp4" | "udp6" => Ok(Box::new(Listener::bind(addr)?)),
        "tcp" | "tcp4" | "tcp6" => Ok(Box::new(TcpListener::bind(addr)?)),
        other => Err(Error::UnsupportedNetwork(other.to_string())),
    }
}
