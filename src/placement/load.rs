use serde::{Deserialize, Serialize};

/// A single scalar load measurement reported by a worker in a probe reply.
///
/// The value is only meaningful relative to other signals from the same
/// epoch; the scheduler never interprets it beyond "lower is better". The
/// per-worker `seq` lets the registry ignore signals that arrive out of
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    load: f64,
    seq: u64,
}

impl LoadSpec {
    /// Build a load signal. Returns `None` for negative or non-finite
    /// loads, which a well-behaved worker never sends.
    pub fn new(load: f64, seq: u64) -> Option<Self> {
        if load.is_finite() && load >= 0.0 {
            Some(Self { load, seq })
        } else {
            None
        }
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True if `other` carries a fresher sequence number than this signal.
    pub fn is_older_than(&self, other: &LoadSpec) -> bool {
        self.seq < other.seq
    }
}
