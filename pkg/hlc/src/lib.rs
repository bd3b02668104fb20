//! Hybrid Logical Clock.
//!
//! Produces `(physical_ms, logical)` timestamps that are strictly
//! monotonic per process and that can be advanced past a remote
//! observation without ever regressing.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A `(physical, logical)` pair, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub physical_ms: u64,
    pub logical: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        physical_ms: 0,
        logical: 0,
    };

    /// The maximum representable timestamp, used as the sentinel
    /// "read the latest version" request in `storage::read`.
    pub const MAX: Timestamp = Timestamp {
        physical_ms: u64::MAX,
        logical: u32::MAX,
    };

    fn next_logical(self) -> Timestamp {
        Timestamp {
            physical_ms: self.physical_ms,
            logical: self.logical + 1,
        }
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single hybrid logical clock instance. One of these exists per
/// process/node; every replica and the RPC dispatch layer share it so that
/// every observed timestamp on that process is consistent.
pub struct HybridClock {
    last: Mutex<Timestamp>,
}

impl HybridClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Timestamp::ZERO),
        }
    }

    /// Returns a new timestamp strictly greater than any timestamp
    /// previously returned by `now()` or `update()` on this clock.
    pub fn now(&self) -> Timestamp {
        let mut last = self.last.lock().unwrap();
        let physical = wall_clock_ms();

        *last = if physical > last.physical_ms {
            Timestamp {
                physical_ms: physical,
                logical: 0,
            }
        } else {
            last.next_logical()
        };

        *last
    }

    /// Advances the clock past `remote`, returning a new local tick that is
    /// strictly greater than both the previous local tick and `remote`.
    pub fn update(&self, remote: Timestamp) -> Timestamp {
        let mut last = self.last.lock().unwrap();
        let physical = wall_clock_ms();

        let base = Timestamp {
            physical_ms: physical,
            logical: 0,
        }
        .max(*last)
        .max(remote);

        *last = if base == remote || base == *last {
            base.next_logical()
        } else {
            base
        };

        *last
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}
