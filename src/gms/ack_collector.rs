//! Collection of view acknowledgements

use std::time::{Duration, Instant};

use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex};

use crate::types::{Address, ViewId};

#[derive(Debug, Default)]
struct Pending {
    view_id: Option<ViewId>,
    missing: IndexSet<Address>,
}

/// Tracks which members still owe an acknowledgement for the view being installed
#[derive(Debug, Default)]
pub struct AckCollector {
    pending: Mutex<Pending>,
    cond: Condvar,
}

impl AckCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start expecting acknowledgements for `view_id` from `members`
    pub fn reset<'a>(&self, view_id: ViewId, members: impl IntoIterator<Item = &'a Address>) {
        let mut pending = self.pending.lock();
        pending.view_id = Some(view_id);
        pending.missing = members.into_iter().copied().collect();
        self.cond.notify_all();
    }

    /// Record an acknowledgement; acks for any other view are ignored
    pub fn ack(&self, view_id: ViewId, sender: Address) -> bool {
        let mut pending = self.pending.lock();
        if pending.view_id != Some(view_id) {
            return false;
        }
        let removed = pending.missing.shift_remove(&sender);
        if pending.missing.is_empty() {
            self.cond.notify_all();
        }
        removed
    }

    /// A suspected member will never acknowledge: stop waiting for it
    pub fn suspect(&self, member: Address) {
        let mut pending = self.pending.lock();
        if pending.missing.shift_remove(&member) && pending.missing.is_empty() {
            self.cond.notify_all();
        }
    }

    /// Drop all expectations, releasing any waiter
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        pending.view_id = None;
        pending.missing.clear();
        self.cond.notify_all();
    }

    pub fn missing(&self) -> Vec<Address> {
        self.pending.lock().missing.iter().copied().collect()
    }

    /// Block until every expected member acknowledged, or `timeout` elapses.
    /// Returns the members that are still missing (empty on success).
    pub fn wait_for_all_acks(&self, timeout: Duration) -> Vec<Address> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !pending.missing.is_empty() {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        pending.missing.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn addr(n: u128) -> Address {
        Address::from_u128(n)
    }

    #[test]
    fn test_all_acks_received() {
        let collector = Arc::new(AckCollector::new());
        let vid = ViewId::new(addr(1), 4);
        collector.reset(vid, &[addr(2), addr(3)]);

        let acker = Arc::clone(&collector);
        let handle = thread::spawn(move || {
            acker.ack(vid, addr(2));
            acker.ack(vid, addr(3));
        });
        assert!(collector.wait_for_all_acks(Duration::from_secs(5)).is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn test_ack_for_other_view_ignored() {
        let collector = AckCollector::new();
        collector.reset(ViewId::new(addr(1), 4), &[addr(2)]);
        assert!(!collector.ack(ViewId::new(addr(1), 3), addr(2)));
        assert_eq!(collector.missing(), vec![addr(2)]);
    }

    #[test]
    fn test_suspect_unblocks() {
        let collector = AckCollector::new();
        let vid = ViewId::new(addr(1), 2);
        collector.reset(vid, &[addr(2), addr(3)]);
        collector.ack(vid, addr(2));
        collector.suspect(addr(3));
        assert!(collector.wait_for_all_acks(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn test_timeout_reports_missing() {
        let collector = AckCollector::new();
        collector.reset(ViewId::new(addr(1), 2), &[addr(2), addr(3)]);
        assert_eq!(
            collector.wait_for_all_acks(Duration::from_millis(10)),
            vec![addr(2), addr(3)]
        );
    }
}
