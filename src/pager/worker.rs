//! Pager worker thread.
//!
//! The pager owns exactly one background thread. The render thread pushes
//! [`PageRequest`]s onto a condvar-guarded queue; the worker pops them one
//! at a time, runs the [`PageLoader`], and parks finished subgraphs in a
//! completed list that the render thread drains at the top of each frame.
//! The worker never touches the loaded-page map directly.
//!
//! Cancellation is cooperative: the worker checks its token between
//! requests and hands it to the loader for long loads; it is never killed.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::scene::{Node, PageKey};

/// How long the worker sleeps on the condvar before re-checking its
/// cancellation token.
const WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// A request to load one paged subgraph.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub key: PageKey,
    pub parent: Option<PageKey>,
}

/// A finished load, waiting to be merged into the scene.
pub(super) struct CompletedPage {
    pub key: PageKey,
    pub parent: Option<PageKey>,
    pub node: Node,
}

/// Produces the subgraph for one page key.
///
/// Runs on the worker thread and may block on I/O. Implementations should
/// poll the token at their own suspension points and return `None` when
/// cancelled; a `None` return is "nothing to show", not an error.
pub trait PageLoader: Send + Sync {
    fn load_page(&self, key: PageKey, cancel: &CancellationToken) -> Option<Node>;
}

/// State shared between the render thread and the worker thread.
pub(super) struct WorkerShared {
    queue: Mutex<VecDeque<PageRequest>>,
    available: Condvar,
    pending: Mutex<HashSet<PageKey>>,
    completed: Mutex<Vec<CompletedPage>>,
    accepting: AtomicBool,
    paused: AtomicBool,
    frame_blocking: AtomicBool,
    running: AtomicBool,
}

impl WorkerShared {
    pub(super) fn new(accepting: bool, paused: bool, frame_blocking: bool) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            pending: Mutex::new(HashSet::new()),
            completed: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(accepting),
            paused: AtomicBool::new(paused),
            frame_blocking: AtomicBool::new(frame_blocking),
            running: AtomicBool::new(false),
        }
    }

    /// Queue a request. Returns false when requests are refused or the
    /// same key is already queued or loading.
    pub(super) fn enqueue(&self, request: PageRequest) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut pending = self.pending.lock().expect("pager pending poisoned");
            if !pending.insert(request.key) {
                return false;
            }
        }
        self.queue
            .lock()
            .expect("pager queue poisoned")
            .push_back(request);
        self.available.notify_one();
        trace!(key = %request.key, "page requested");
        true
    }

    /// Take every finished load, in completion order.
    pub(super) fn drain_completed(&self) -> Vec<CompletedPage> {
        std::mem::take(&mut *self.completed.lock().expect("pager completed poisoned"))
    }

    pub(super) fn queued(&self) -> usize {
        self.queue.lock().expect("pager queue poisoned").len()
    }

    pub(super) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub(super) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub(super) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.available.notify_all();
        }
    }

    pub(super) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(super) fn set_frame_blocking(&self, blocking: bool) {
        self.frame_blocking.store(blocking, Ordering::SeqCst);
    }

    pub(super) fn is_frame_blocking(&self) -> bool {
        self.frame_blocking.load(Ordering::SeqCst)
    }

    pub(super) fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wake the worker so it notices a freshly cancelled token.
    pub(super) fn wake(&self) {
        self.available.notify_all();
    }

    fn next_request(&self, cancel: &CancellationToken) -> Option<PageRequest> {
        let mut queue = self.queue.lock().expect("pager queue poisoned");
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if !self.is_paused() {
                if let Some(request) = queue.pop_front() {
                    return Some(request);
                }
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(queue, WAKE_INTERVAL)
                .expect("pager queue poisoned");
            queue = guard;
        }
    }

    fn finish(&self, request: PageRequest, node: Option<Node>, cancel: &CancellationToken) {
        self.pending
            .lock()
            .expect("pager pending poisoned")
            .remove(&request.key);

        // A load finishing after cancellation is discarded, not merged.
        if cancel.is_cancelled() {
            return;
        }
        if let Some(node) = node {
            self.completed
                .lock()
                .expect("pager completed poisoned")
                .push(CompletedPage {
                    key: request.key,
                    parent: request.parent,
                    node,
                });
            trace!(key = %request.key, "page loaded");
        }
    }
}

/// Worker thread entry point.
pub(super) fn run(shared: Arc<WorkerShared>, loader: Arc<dyn PageLoader>, cancel: CancellationToken) {
    debug!("pager worker started");
    while let Some(request) = shared.next_request(&cancel) {
        let node = loader.load_page(request.key, &cancel);
        shared.finish(request, node, &cancel);
    }
    shared.running.store(false, Ordering::SeqCst);
    debug!("pager worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dedupes_pending_keys() {
        let shared = WorkerShared::new(true, false, false);
        let request = PageRequest {
            key: PageKey::new(3, 1, 2),
            parent: None,
        };
        assert!(shared.enqueue(request));
        assert!(!shared.enqueue(request));
        assert_eq!(shared.queued(), 1);
    }

    #[test]
    fn test_enqueue_refused_when_not_accepting() {
        let shared = WorkerShared::new(true, false, false);
        shared.set_accepting(false);
        assert!(!shared.enqueue(PageRequest {
            key: PageKey::new(0, 0, 0),
            parent: None,
        }));
        assert_eq!(shared.queued(), 0);
    }

    #[test]
    fn test_cancelled_load_is_discarded() {
        let shared = WorkerShared::new(true, false, false);
        let request = PageRequest {
            key: PageKey::new(1, 0, 0),
            parent: None,
        };
        shared.enqueue(request);

        let cancel = CancellationToken::new();
        cancel.cancel();
        shared.finish(request, Some(Node::leaf("late")), &cancel);

        assert!(shared.drain_completed().is_empty());
        // The pending slot is released so the key can be requested again.
        assert!(shared.enqueue(request));
    }
}
