//! Single-slot blocking result cell
//!
//! A `Promise` turns an asynchronous response (a LEAVE or JOIN response
//! delivered by the transport) into a blocking call with a timeout. Besides
//! the result it records the responder the current wait expects, so a waiter
//! can tell whether its wait was superseded by a later `reset`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::types::Address;

#[derive(Debug)]
struct Slot<T> {
    expected: Option<Address>,
    result: Option<T>,
    has_result: bool,
}

/// Condition-variable backed single-slot cell
#[derive(Debug)]
pub struct Promise<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Promise completed with the address of the member acknowledging a leave
pub type LeavePromise = Promise<Address>;

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                expected: None,
                result: None,
                has_result: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Clear any result and record who is expected to respond
    pub fn reset(&self, expected: Option<Address>) {
        let mut slot = self.slot.lock();
        slot.expected = expected;
        slot.result = None;
        slot.has_result = false;
    }

    /// Store a result and wake every waiter
    pub fn set_result(&self, result: T) {
        let mut slot = self.slot.lock();
        slot.result = Some(result);
        slot.has_result = true;
        self.cond.notify_all();
    }

    /// Block until a result is set or `timeout` elapses.
    /// Returns whatever is stored at that point, `None` on timeout.
    pub fn get_result(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !slot.has_result {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.result.clone()
    }

    /// The responder the current wait expects, as set by the last `reset`
    pub fn expected_result(&self) -> Option<Address> {
        self.slot.lock().expected
    }

    pub fn has_result(&self) -> bool {
        self.slot.lock().has_result
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}
