//! Address-keyed table of peer entries shared by the demultiplexer and the
//! connections spawned from it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::entry::{Entry, Verdict};
use crate::error::Error;

/// Peer registry: one [`Entry`] per remote address.
///
/// The table is the only structure touched by multiple actors (the
/// demultiplexer inserts, connection reads evict), so all table operations
/// go through one mutex. Per-peer byte traffic never takes this lock; each
/// entry synchronizes its own queue and timestamp.
///
/// Owned by the listener and handed to spawned connections by `Arc`; there
/// is no process-wide state.
pub(crate) struct Registry {
    table: Mutex<HashMap<SocketAddr, Arc<Entry>>>,
    queue_capacity: usize,
}

impl Registry {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Entry for `addr` if the peer is currently known.
    pub(crate) fn lookup(&self, addr: SocketAddr) -> Option<Arc<Entry>> {
        self.table.lock().get(&addr).cloned()
    }

    /// Existing entry for `addr`, or a fresh one inserted under the table
    /// lock. The returned flag is true exactly once per address lifetime,
    /// however many packets race on first contact; it is the sole trigger
    /// for surfacing a new-connection event.
    pub(crate) fn get_or_create(&self, addr: SocketAddr) -> (Arc<Entry>, bool) {
        use std::collections::hash_map::Entry as Slot;
        let mut table = self.table.lock();
        match table.entry(addr) {
            Slot::Occupied(slot) => (slot.get().clone(), false),
            Slot::Vacant(slot) => {
                let entry = Arc::new(Entry::new(self.queue_capacity));
                slot.insert(entry.clone());
                (entry, true)
            }
        }
    }

    /// Forget a peer. A later `get_or_create` for the same address starts a
    /// brand-new lifetime.
    pub(crate) fn remove(&self, addr: SocketAddr) {
        self.table.lock().remove(&addr);
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Read bytes queued for `addr` with the liveness policy applied.
    ///
    /// A missing entry means the peer was already evicted, which is
    /// end-of-stream. A dead verdict evicts the entry before surfacing
    /// end-of-stream, so a subsequent datagram from the same address is
    /// treated as a brand-new peer.
    pub(crate) fn read(
        &self,
        addr: SocketAddr,
        buf: &mut [u8],
        closed: &Receiver<()>,
        dead: Duration,
    ) -> Result<usize, Error> {
        let entry = self.lookup(addr).ok_or(Error::Disconnected)?;
        let drain = entry.drain(buf, closed, dead);
        match entry.resolve(drain, dead) {
            Verdict::Data(n) => Ok(n),
            Verdict::Dead => {
                tracing::debug!(%addr, "peer silent past dead interval, evicting");
                self.remove(addr);
                Err(Error::Disconnected)
            }
            Verdict::Closed => Err(Error::Closed),
        }
    }
}
