//! The inbound demultiplexer: one receive loop per shared socket.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, Receiver, Sender};

use crate::config::Config;
use crate::conn::{Conn, ReadSource};
use crate::registry::Registry;
use crate::socket::PacketSocket;

/// Spawn the receive loop for a listening socket.
///
/// Every datagram is attributed to its source address: the payload (empty
/// heartbeats included) is pushed into that peer's entry, and the first
/// datagram from a new address additionally produces a connection on the
/// accept queue. The hand-off to the accept queue happens on a detached
/// thread racing against listener shutdown, so a full queue or an
/// uninterested accepter never stalls the receive loop.
///
/// The socket is expected to carry a read timeout of one heartbeat interval
/// so the loop observes shutdown while idle. Receive errors are swallowed
/// and the loop continues; only shutdown ends it.
pub(crate) fn spawn(
    socket: Arc<dyn PacketSocket>,
    registry: Arc<Registry>,
    accept_tx: Sender<Conn>,
    closed: Receiver<()>,
    cfg: Config,
) {
    thread::spawn(move || {
        let mut buf = vec![0u8; cfg.recv_buffer];
        loop {
            if shut_down(&closed) {
                return;
            }
            let (len, addr) = match socket.recv_from(&mut buf) {
                Ok(got) => got,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::trace!(error = %e, "receive error, continuing");
                    continue;
                }
            };

            let (entry, created) = registry.get_or_create(addr);
            if !entry.push(&buf[..len]) {
                tracing::trace!(%addr, len, "inbound queue full, datagram dropped");
            }
            if created {
                tracing::debug!(%addr, "new peer");
                let conn = Conn::new(
                    ReadSource::Shared {
                        registry: registry.clone(),
                        addr,
                    },
                    socket.clone(),
                    Some(addr),
                    cfg.clone(),
                );
                let accept_tx = accept_tx.clone();
                let closed = closed.clone();
                thread::spawn(move || {
                    select! {
                        send(accept_tx, conn) -> _ => {},
                        recv(closed) -> _ => {},
                    }
                });
            }
        }
    });
}

/// Whether the owning connection or listener has been shut down (its end of
/// the signal channel dropped).
pub(crate) fn shut_down(closed: &Receiver<()>) -> bool {
    matches!(
        closed.try_recv(),
        Err(crossbeam_channel::TryRecvError::Disconnected)
    )
}
