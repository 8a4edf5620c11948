//! Tunable timing and capacity parameters.

use std::time::Duration;

use crate::error::Error;

/// Default interval between heartbeat datagrams on an open connection.
pub const HEARTBEAT: Duration = Duration::from_secs(10);
/// Default maximum silence tolerated before a peer is declared dead.
pub const DEAD: Duration = Duration::from_secs(20);
/// Default per-peer inbound queue capacity in bytes.
pub const QUEUE_CAPACITY: usize = 128 * 1024;
/// Default receive buffer size, bounding the largest accepted datagram.
pub const RECV_BUFFER: usize = 8192;
/// Default accept queue depth.
pub const ACCEPT_BACKLOG: usize = 8;

/// Timing and capacity parameters for listeners and dialed connections.
///
/// These are local tuning knobs, not wire-negotiated values. Both sides of a
/// link may use different settings, but a peer whose heartbeat interval
/// exceeds the other side's dead interval will be declared dead while idle.
#[derive(Clone, Debug)]
pub struct Config {
    /// Interval between heartbeat datagrams sent by an open connection.
    pub heartbeat: Duration,
    /// Maximum silence (no payload, no heartbeat) before a peer is dead.
    /// Must exceed `heartbeat`; nominally twice it.
    pub dead: Duration,
    /// Per-peer inbound queue capacity in bytes. Payloads that do not fit
    /// in the remaining capacity are dropped whole.
    pub queue_capacity: usize,
    /// Receive buffer size; datagrams are truncated to this length by the OS.
    pub recv_buffer: usize,
    /// Number of not-yet-accepted connections the listener will hold.
    pub accept_backlog: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT,
            dead: DEAD,
            queue_capacity: QUEUE_CAPACITY,
            recv_buffer: RECV_BUFFER,
            accept_backlog: ACCEPT_BACKLOG,
        }
    }
}

impl Config {
    /// Config with the given heartbeat interval and a dead interval of
    /// twice that, keeping the other parameters at their defaults.
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            heartbeat,
            dead: heartbeat * 2,
            ..Self::default()
        }
    }

    /// Check parameter consistency.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dead <= self.heartbeat {
            return Err(Error::Config("dead interval must exceed heartbeat"));
        }
        if self.heartbeat.is_zero() {
            return Err(Error::Config("heartbeat must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be non-zero"));
        }
        if self.recv_buffer == 0 {
            return Err(Error::Config("receive buffer must be non-zero"));
        }
        if self.accept_backlog == 0 {
            return Err(Error::Config("accept backlog must be non-zero"));
        }
        Ok(())
    }
}
