//! Initial block download tracking
//!
//! The node reports itself as syncing until the tip is recent and at least as
//! heavy as anything it has heard about. Once caught up it stays caught up for
//! the rest of the process.

use std::sync::atomic::{AtomicBool, Ordering};

use primitive_types::U256;
use tracing::info;

/// Inputs to one IBD decision, read by the caller in a single critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInputs {
    pub tip_time: u64,
    pub tip_work: U256,
    pub best_header_work: U256,
    pub best_peer_work: U256,
    pub now: u64,
}

#[derive(Debug)]
pub struct SyncTracker {
    max_tip_age_secs: u64,
    caught_up: AtomicBool,
    importing: AtomicBool,
}

impl SyncTracker {
    pub fn new(max_tip_age_secs: u64) -> Self {
        Self {
            max_tip_age_secs,
            caught_up: AtomicBool::new(false),
            importing: AtomicBool::new(false),
        }
    }

    pub fn set_importing(&self, importing: bool) {
        self.importing.store(importing, Ordering::SeqCst);
    }

    pub fn is_importing(&self) -> bool {
        self.importing.load(Ordering::SeqCst)
    }

    pub fn is_caught_up(&self) -> bool {
        self.caught_up.load(Ordering::SeqCst)
    }

    /// Whether the node is still in initial block download.
    pub fn in_initial_block_download(&self, inputs: &SyncInputs) -> bool {
        if self.is_caught_up() {
            return false;
        }
        if self.is_importing() {
            return true;
        }
        if inputs.tip_work < inputs.best_header_work || inputs.tip_work < inputs.best_peer_work {
            return true;
        }
        if inputs.now.saturating_sub(inputs.tip_time) > self.max_tip_age_secs {
            return true;
        }

        if !self.caught_up.swap(true, Ordering::SeqCst) {
            info!(tip_time = inputs.tip_time, "leaving initial block download");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(tip_time: u64, now: u64) -> SyncInputs {
        SyncInputs {
            tip_time,
            tip_work: U256::from(100),
            best_header_work: U256::from(100),
            best_peer_work: U256::from(90),
            now,
        }
    }

    #[test]
    fn test_stale_tip_is_syncing() {
        let tracker = SyncTracker::new(3600);
        assert!(tracker.in_initial_block_download(&inputs(0, 10_000)));
        assert!(!tracker.is_caught_up());
    }

    #[test]
    fn test_latches_once_caught_up() {
        let tracker = SyncTracker::new(3600);
        assert!(!tracker.in_initial_block_download(&inputs(9_000, 10_000)));
        // A stale tip later does not send us back into IBD.
        assert!(!tracker.in_initial_block_download(&inputs(0, 1_000_000)));
    }

    #[test]
    fn test_heavier_peer_keeps_syncing() {
        let tracker = SyncTracker::new(3600);
        let mut i = inputs(9_000, 10_000);
        i.best_peer_work = U256::from(101);
        assert!(tracker.in_initial_block_download(&i));

        i.best_peer_work = U256::from(90);
        i.best_header_work = U256::from(150);
        assert!(tracker.in_initial_block_download(&i));
    }

    #[test]
    fn test_importing_keeps_syncing() {
        let tracker = SyncTracker::new(3600);
        tracker.set_importing(true);
        assert!(tracker.in_initial_block_download(&inputs(9_000, 10_000)));
        tracker.set_importing(false);
        assert!(!tracker.in_initial_block_download(&inputs(9_000, 10_000)));
    }
}
