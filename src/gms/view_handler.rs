//! View change queue
//!
//! Serializes membership change requests submitted from arbitrary threads.
//! Whoever submits into an idle queue becomes the processing thread and
//! drains batches until the queue is empty; submissions made while a batch
//! is being processed (including re-entrant ones from the processor itself)
//! simply accumulate for the next batch. At most one batch is ever in the
//! processor at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{trace, warn};

use crate::gms::request::{Request, RequestKind};
use crate::types::Address;

/// Consumer of request batches
pub trait RequestProcessor: Send + Sync {
    fn process(&self, requests: Vec<Request>);
}

impl<F> RequestProcessor for F
where
    F: Fn(Vec<Request>) + Send + Sync,
{
    fn process(&self, requests: Vec<Request>) {
        self(requests)
    }
}

#[derive(Debug, Default)]
struct Queue {
    requests: VecDeque<Request>,
    processing: bool,
    suspended: bool,
}

/// Batching and serialization layer in front of the active role
pub struct ViewHandler {
    local: Address,
    queue: Mutex<Queue>,
    idle: Condvar,
    processor: RwLock<Arc<dyn RequestProcessor>>,
    max_batch_size: usize,
}

impl ViewHandler {
    /// Create a handler; `max_batch_size` of 0 means unbounded batches
    pub fn new(local: Address, processor: Arc<dyn RequestProcessor>, max_batch_size: usize) -> Self {
        Self {
            local,
            queue: Mutex::new(Queue::default()),
            idle: Condvar::new(),
            processor: RwLock::new(processor),
            max_batch_size,
        }
    }

    pub fn add(&self, request: Request) {
        self.add_all([request]);
    }

    /// Enqueue requests and drain the queue on this thread unless another
    /// thread is already doing so
    pub fn add_all<I>(&self, requests: I)
    where
        I: IntoIterator<Item = Request>,
    {
        {
            let mut queue = self.queue.lock();
            if queue.suspended {
                let dropped: Vec<Request> = requests.into_iter().collect();
                trace!(local = %self.local, ?dropped, "view handler suspended, dropping requests");
                return;
            }
            let before = queue.requests.len();
            queue.requests.extend(requests);
            if queue.requests.len() == before || queue.processing {
                return;
            }
            queue.processing = true;
        }
        self.drain();
    }

    fn drain(&self) {
        let mut guard = DrainGuard {
            handler: self,
            done: false,
        };
        loop {
            let batch = {
                let mut queue = self.queue.lock();
                match self.next_batch(&mut queue) {
                    Some(batch) => batch,
                    None => {
                        queue.processing = false;
                        guard.done = true;
                        self.idle.notify_all();
                        return;
                    }
                }
            };
            trace!(local = %self.local, requests = ?batch, "dispatching batch");
            let processor = Arc::clone(&*self.processor.read());
            processor.process(batch);
        }
    }

    /// Take the next batch off the queue: a run of requests that can be
    /// processed together, duplicates collapsed. A merge always travels alone.
    fn next_batch(&self, queue: &mut Queue) -> Option<Vec<Request>> {
        let first = queue.requests.pop_front()?;
        let mut batch = IndexSet::new();
        batch.insert(first.clone());
        while let Some(next) = queue.requests.front() {
            if !first.can_be_processed_together(next) {
                break;
            }
            if self.max_batch_size > 0 && batch.len() >= self.max_batch_size {
                break;
            }
            if let Some(next) = queue.requests.pop_front() {
                batch.insert(next);
            }
        }
        Some(batch.into_iter().collect())
    }

    /// Replace the processor, returning the previous one. Requests already
    /// queued are delivered to the new processor.
    pub fn set_processor(&self, processor: Arc<dyn RequestProcessor>) -> Arc<dyn RequestProcessor> {
        std::mem::replace(&mut *self.processor.write(), processor)
    }

    pub fn processor(&self) -> Arc<dyn RequestProcessor> {
        Arc::clone(&*self.processor.read())
    }

    /// Stop accepting requests and discard anything not yet dispatched
    pub fn suspend(&self) {
        let mut queue = self.queue.lock();
        queue.suspended = true;
        if !queue.requests.is_empty() {
            trace!(local = %self.local, pending = queue.requests.len(), "discarding pending requests");
            queue.requests.clear();
        }
    }

    pub fn resume(&self) {
        self.queue.lock().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.queue.lock().suspended
    }

    pub fn is_processing(&self) -> bool {
        self.queue.lock().processing
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().requests.len()
    }

    /// Wait until no batch is being processed and nothing is queued.
    /// Must not be called from inside the processor. Returns false on timeout.
    pub fn wait_until_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        while queue.processing || !queue.requests.is_empty() {
            if self.idle.wait_until(&mut queue, deadline).timed_out() {
                return !queue.processing && queue.requests.is_empty();
            }
        }
        true
    }
}

impl std::fmt::Debug for ViewHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("ViewHandler")
            .field("local", &self.local)
            .field("pending", &queue.requests.len())
            .field("processing", &queue.processing)
            .field("suspended", &queue.suspended)
            .finish()
    }
}

/// Releases the processing flag if the processor unwinds
struct DrainGuard<'a> {
    handler: &'a ViewHandler,
    done: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(local = %self.handler.local, "request processor panicked, releasing view handler");
            let mut queue = self.handler.queue.lock();
            queue.processing = false;
            self.handler.idle.notify_all();
        }
    }
}
