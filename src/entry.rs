//! Per-peer inbound state: a bounded byte queue plus a liveness timestamp.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;

/// Outcome of one drain pass over the queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Drain {
    /// The destination buffer was filled completely.
    Filled(usize),
    /// The dead interval elapsed with `n` bytes gathered so far.
    Stalled(usize),
    /// The close signal fired while waiting.
    Interrupted,
}

/// What a read call should report after a drain pass.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Bytes to hand to the caller; zero means "no data yet, peer alive".
    Data(usize),
    /// No byte, no liveness signal within the dead interval: peer is gone.
    Dead,
    /// The connection was closed locally.
    Closed,
}

/// Inbound state for exactly one remote peer.
///
/// The demultiplexer (or the dial path's private read loop) is the sole
/// producer; the peer's stream connection is the sole byte consumer. The
/// timestamp is written by the producer and read by the consumer, so it
/// carries its own lock independent of any registry-wide locking.
pub(crate) struct Entry {
    tx: Sender<u8>,
    rx: Receiver<u8>,
    capacity: usize,
    last_seen: Mutex<Instant>,
}

impl Entry {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record an inbound datagram attributed to this peer.
    ///
    /// Any contact proves liveness, so the timestamp is refreshed even for
    /// an empty payload (the heartbeat convention). A non-empty payload is
    /// admitted whole or not at all: partial admission would tear datagram
    /// contents apart mid-stream. Returns whether the payload was admitted.
    pub(crate) fn push(&self, payload: &[u8]) -> bool {
        *self.last_seen.lock() = Instant::now();
        if payload.is_empty() {
            return true;
        }
        if self.capacity - self.tx.len() < payload.len() {
            return false;
        }
        for &b in payload {
            // Sole producer, so the capacity check above cannot be raced.
            if self.tx.try_send(b).is_err() {
                break;
            }
        }
        true
    }

    /// Pull bytes into `buf`, blocking up to `dead` for each byte position.
    ///
    /// Data arrival, the close signal and the timeout are raced with equal
    /// priority, so a blocked read wakes promptly on close.
    pub(crate) fn drain(&self, buf: &mut [u8], closed: &Receiver<()>, dead: Duration) -> Drain {
        for n in 0..buf.len() {
            select! {
                recv(self.rx) -> byte => match byte {
                    Ok(b) => buf[n] = b,
                    Err(_) => return Drain::Stalled(n),
                },
                recv(closed) -> _ => return Drain::Interrupted,
                default(dead) => return Drain::Stalled(n),
            }
        }
        Drain::Filled(buf.len())
    }

    /// Whether this peer has been heard from within the dead interval.
    pub(crate) fn is_live(&self, dead: Duration) -> bool {
        self.last_seen.lock().elapsed() < dead
    }

    /// Apply the liveness policy to a drain outcome.
    ///
    /// A stall on the very first byte is terminal only when the peer has
    /// also been silent past the dead interval; a recent heartbeat makes it
    /// a benign "no data yet". A stall after at least one byte is a short
    /// read, which is success.
    pub(crate) fn resolve(&self, drain: Drain, dead: Duration) -> Verdict {
        match drain {
            Drain::Filled(n) => Verdict::Data(n),
            Drain::Stalled(0) if !self.is_live(dead) => Verdict::Dead,
            Drain::Stalled(n) => Verdict::Data(n),
            Drain::Interrupted => Verdict::Closed,
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_closed() -> (Sender<()>, Receiver<()>) {
        bounded(0)
    }

    #[test]
    fn push_then_drain_preserves_order() {
        let entry = Entry::new(64);
        assert!(entry.push(b"abc"));
        assert!(entry.push(b"def"));

        let (_tx, closed) = never_closed();
        let mut buf = [0u8; 6];
        let drain = entry.drain(&mut buf, &closed, Duration::from_millis(10));
        assert_eq!(drain, Drain::Filled(6));
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn oversized_payload_dropped_whole() {
        let entry = Entry::new(8);
        assert!(entry.push(b"1234"));
        assert!(!entry.push(b"abcdef")); // 6 > 8 - 4
        assert_eq!(entry.queued(), 4);

        assert!(entry.push(b"5678"));
        let (_tx, closed) = never_closed();
        let mut buf = [0u8; 8];
        entry.drain(&mut buf, &closed, Duration::from_millis(10));
        assert_eq!(&buf, b"12345678");
    }

    #[test]
    fn empty_push_refreshes_liveness_only() {
        let entry = Entry::new(8);
        assert!(entry.push(&[]));
        assert_eq!(entry.queued(), 0);
        assert!(entry.is_live(Duration::from_millis(50)));
    }

    #[test]
    fn stall_with_recent_contact_is_not_dead() {
        let entry = Entry::new(8);
        entry.push(&[]);

        let (_tx, closed) = never_closed();
        let mut buf = [0u8; 4];
        let drain = entry.drain(&mut buf, &closed, Duration::from_millis(20));
        assert_eq!(drain, Drain::Stalled(0));
        // Contact was just now, well within a generous dead interval.
        assert_eq!(entry.resolve(drain, Duration::from_secs(5)), Verdict::Data(0));
    }

    #[test]
    fn silent_past_dead_interval_is_dead() {
        let entry = Entry::new(8);
        let dead = Duration::from_millis(30);
        std::thread::sleep(Duration::from_millis(40));

        let (_tx, closed) = never_closed();
        let mut buf = [0u8; 4];
        let drain = entry.drain(&mut buf, &closed, dead);
        assert_eq!(entry.resolve(drain, dead), Verdict::Dead);
    }

    #[test]
    fn short_read_beats_dead_verdict() {
        let entry = Entry::new(8);
        entry.push(b"x");
        let dead = Duration::from_millis(30);
        std::thread::sleep(Duration::from_millis(40));

        let (_tx, closed) = never_closed();
        let mut buf = [0u8; 4];
        let drain = entry.drain(&mut buf, &closed, dead);
        // One byte was gathered, so this is a short read even though the
        // timestamp is stale.
        assert_eq!(entry.resolve(drain, dead), Verdict::Data(1));
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn close_signal_wakes_blocked_drain() {
        let entry = std::sync::Arc::new(Entry::new(8));
        let (tx, closed) = never_closed();

        let handle = std::thread::spawn({
            let entry = entry.clone();
            move || {
                let mut buf = [0u8; 4];
                entry.drain(&mut buf, &closed, Duration::from_secs(5))
            }
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(handle.join().unwrap(), Drain::Interrupted);
    }
}
