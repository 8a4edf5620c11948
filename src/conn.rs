//! The per-peer stream connection and the outward-facing connection trait.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::entry::{Entry, Verdict};
use crate::error::Error;
use crate::registry::Registry;
use crate::socket::PacketSocket;

/// Where a connection's inbound bytes come from.
///
/// Accepted connections share the listener's registry and are keyed by the
/// peer address; dialed connections own a private entry fed by a dedicated
/// socket, so no address-keyed lookup is needed. Both expose the same
/// read-with-liveness capability.
pub(crate) enum ReadSource {
    /// Listener path: bytes demultiplexed into the shared registry.
    Shared {
        registry: Arc<Registry>,
        addr: SocketAddr,
    },
    /// Dial path: a single implicit peer with its own entry.
    Private {
        entry: Arc<Entry>,
        hung_up: AtomicBool,
    },
}

impl ReadSource {
    fn read(
        &self,
        buf: &mut [u8],
        closed: &Receiver<()>,
        dead: Duration,
    ) -> Result<usize, Error> {
        match self {
            ReadSource::Shared { registry, addr } => registry.read(*addr, buf, closed, dead),
            ReadSource::Private { entry, hung_up } => {
                // Mirrors registry eviction: once dead, stay dead.
                if hung_up.load(Ordering::Acquire) {
                    return Err(Error::Disconnected);
                }
                let drain = entry.drain(buf, closed, dead);
                match entry.resolve(drain, dead) {
                    Verdict::Data(n) => Ok(n),
                    Verdict::Dead => {
                        tracing::debug!("dialed peer silent past dead interval");
                        hung_up.store(true, Ordering::Release);
                        Err(Error::Disconnected)
                    }
                    Verdict::Closed => Err(Error::Closed),
                }
            }
        }
    }
}

/// An ordered byte stream to one remote peer over a packet socket.
///
/// Reads pull from the peer's inbound queue and evaluate liveness: a read
/// may legitimately return zero bytes with no error when the peer is alive
/// but idle, and fewer bytes than requested is success, not failure (loop if
/// you need an exact count, or use the [`io::Read`] adapter which does).
/// Writes send datagrams directly on the underlying socket. A background
/// task sends an empty heartbeat datagram every heartbeat interval until the
/// connection is closed.
pub struct Conn {
    source: ReadSource,
    socket: Arc<dyn PacketSocket>,
    /// Remote address for sends on a shared listening socket; `None` when
    /// the socket itself is connected to the peer (dial path).
    peer: Option<SocketAddr>,
    cfg: Config,
    closed: Receiver<()>,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl Conn {
    pub(crate) fn new(
        source: ReadSource,
        socket: Arc<dyn PacketSocket>,
        peer: Option<SocketAddr>,
        cfg: Config,
    ) -> Self {
        let (tx, rx) = bounded::<()>(0);
        let conn = Self {
            source,
            socket,
            peer,
            cfg,
            closed: rx,
            shutdown: Mutex::new(Some(tx)),
        };
        conn.spawn_heartbeat();
        conn
    }

    /// Heartbeats refresh the remote side's liveness view of this end and
    /// keep NAT/firewall mappings warm. On the wire they are plain empty
    /// datagrams, indistinguishable from a zero-length application write.
    fn spawn_heartbeat(&self) {
        let socket = self.socket.clone();
        let peer = self.peer;
        let closed = self.closed.clone();
        let period = self.cfg.heartbeat;
        thread::spawn(move || {
            // Announce presence right away so the remote learns about this
            // end before the first tick (and before any payload is written).
            let _ = send_datagram(&*socket, &[], peer);
            let ticker = tick(period);
            loop {
                select! {
                    recv(closed) -> _ => return,
                    recv(ticker) -> _ => {
                        if let Err(e) = send_datagram(&*socket, &[], peer) {
                            tracing::trace!(error = %e, "heartbeat send failed");
                        }
                    }
                }
            }
        });
    }

    fn is_closed(&self) -> bool {
        self.shutdown.lock().is_none()
    }

    /// Signal observed by this connection's background tasks: it fires once
    /// the connection is closed or dropped.
    pub(crate) fn shutdown_signal(&self) -> Receiver<()> {
        self.closed.clone()
    }

    /// Read up to `buf.len()` bytes from the peer.
    ///
    /// Returns `Ok(0)` when no byte arrived within the dead interval but the
    /// peer has been heard from recently (retry later), `Ok(n)` with
    /// `0 < n <= buf.len()` otherwise. Fails with [`Error::Disconnected`]
    /// when the peer has been silent past the dead interval, and with
    /// [`Error::Closed`] after [`Conn::close`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.source.read(buf, &self.closed, self.cfg.dead)
    }

    /// Send `buf` to the peer as a single datagram.
    ///
    /// No reliability is added: the datagram may be lost, duplicated or
    /// reordered by the transport, and the remote drops it whole if its
    /// inbound queue cannot take it.
    pub fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(send_datagram(&*self.socket, buf, self.peer)?)
    }

    /// Close the connection. Idempotent.
    ///
    /// All subsequent reads and writes fail with [`Error::Closed`], a read
    /// blocked in another thread wakes promptly, and the heartbeat task
    /// stops. A listener's shared socket stays open (the listener owns it);
    /// a dialed connection's private socket closes once its background
    /// tasks wind down.
    pub fn close(&self) {
        self.shutdown.lock().take();
        // Drop the registry entry so the table only holds peers with an
        // open connection; later datagrams from this address start a
        // brand-new peer lifetime.
        if let ReadSource::Shared { registry, addr } = &self.source {
            registry.remove(*addr);
        }
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Address of the remote peer.
    pub fn remote_addr(&self) -> io::Result<SocketAddr> {
        match self.peer {
            Some(addr) => Ok(addr),
            None => self.socket.peer_addr(),
        }
    }
}

impl Drop for Conn {
    /// Dropping a connection closes it, so an accepted connection that goes
    /// out of scope does not leave its registry entry behind.
    fn drop(&mut self) {
        self.close();
    }
}

fn send_datagram(
    socket: &dyn PacketSocket,
    buf: &[u8],
    peer: Option<SocketAddr>,
) -> io::Result<usize> {
    match peer {
        Some(addr) => socket.send_to(buf, addr),
        None => socket.send(buf),
    }
}

impl io::Read for Conn {
    /// Blocking adapter over [`Conn::read`]: transient stalls are retried
    /// internally and end-of-stream becomes `Ok(0)`, so the connection reads
    /// like any other blocking stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match Conn::read(self, buf) {
                Ok(0) if !buf.is_empty() => continue,
                Ok(n) => return Ok(n),
                Err(Error::Disconnected) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl io::Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Conn::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The stream-connection contract exposed to application code.
///
/// Implemented by [`Conn`] for packet transports and by [`TcpStream`] for
/// the native stream pass-through, so callers can hold either behind
/// `Box<dyn Connection>`.
pub trait Connection: io::Read + io::Write + Send {
    /// Local address of the underlying socket.
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// Address of the remote peer.
    fn remote_addr(&self) -> io::Result<SocketAddr>;
    /// Close the connection; subsequent reads and writes fail.
    fn close(&mut self) -> io::Result<()>;
    /// Bound both read and write blocking time, where supported.
    fn set_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    /// Bound read blocking time, where supported.
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    /// Bound write blocking time, where supported.
    fn set_write_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Connection for Conn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Conn::local_addr(self)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Conn::remote_addr(self)
    }

    fn close(&mut self) -> io::Result<()> {
        Conn::close(self);
        Ok(())
    }

    // Deadlines are accepted but have no effect on packet connections:
    // blocking behavior is governed solely by the dead-interval policy.
    fn set_deadline(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_read_deadline(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_deadline(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn close(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }

    fn set_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }

    fn set_write_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_write_timeout(timeout)
    }
}
