//! Typed identifiers shared across pipeline components.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identity of one partition key range, as assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeId(pub String);

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RangeId {
    fn from(value: &str) -> Self {
        RangeId(value.to_string())
    }
}

/// Per-request correlation id attached to every partition drain, rendered as
/// hex in diagnostics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub u64);

impl ActivityId {
    /// Allocates a process-unique activity id.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        static SEED: AtomicU64 = AtomicU64::new(0);
        if SEED.load(Ordering::Relaxed) == 0 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1);
            let _ = SEED.compare_exchange(0, nanos | 1, Ordering::Relaxed, Ordering::Relaxed);
        }
        let seed = SEED.load(Ordering::Relaxed);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        ActivityId(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(seq))
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
