//! Process-wide scan counters.
//!
//! Mutated only from the reactor thread (single-writer), so no atomics
//! or locks are needed: there are no other threads to share them with.

/// Monotonic, non-decreasing counters for the lifetime of a scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub initiated: u64,
    pub connected: u64,
    pub completed: u64,
    pub matched: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }
}
