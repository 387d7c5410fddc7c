//! Asynchronous tile pager.
//!
//! The pager streams paged subgraphs in and out of the renderable scene
//! based on frame-by-frame visitation. The render loop brackets each frame
//! with [`TilePager::pre_render`] and [`TilePager::post_render`]: the
//! pre-render step merges finished loads into the loaded-page map, the
//! post-render step evicts pages that went unvisited past the expiry
//! delay. One background worker thread ([`worker`]) performs the loads.
//!
//! The process-wide pager is an explicit service: created once with
//! [`TilePager::create`], fetched with [`TilePager::instance`], torn down
//! exactly once with [`TilePager::destroy`] (idempotent, and the one
//! blocking call in the system). [`PagerShutdown`] is a scope guard that
//! calls `destroy` for embedders that prefer RAII at the end of `main`.
//! Unit tests and embedded uses create free-standing pagers with
//! [`TilePager::standalone`].

mod error;
mod worker;

pub use error::PagerError;
pub use worker::{PageLoader, PageRequest};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::layer::TilesChangedListener;
use crate::scene::{Node, PageKey};

use worker::WorkerShared;

/// Pager tuning knobs.
///
/// The defaults are the aggressive-eviction configuration: unvisited
/// subgraphs are eligible for eviction the moment they miss a frame,
/// trading memory for a guaranteed bounded footprint. The frame-blocking
/// handshake defaults to off; leaving it on makes shutdown wait on a frame
/// that will never come.
#[derive(Debug, Clone)]
pub struct PagerConfig {
    /// How long an unvisited page is retained before eviction.
    pub expiry_delay: Duration,
    /// Whether new load requests are accepted at construction.
    pub accept_requests: bool,
    /// Whether the worker starts paused.
    pub paused: bool,
    /// Whether the worker blocks frame completion on pending loads.
    pub frame_blocking: bool,
    /// Coarse sleep between quiescence polls during `destroy`.
    pub destroy_poll: Duration,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            expiry_delay: Duration::ZERO,
            accept_requests: true,
            paused: false,
            frame_blocking: false,
            destroy_poll: Duration::from_millis(10),
        }
    }
}

/// Pager lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Routes paging requests from scene traversal to a pager.
pub trait PageRequestHandler: Send + Sync {
    /// Ask for a page to be loaded. Returns false when the request was
    /// refused (shutdown, duplicate, or requests disabled).
    fn request_page(&self, key: PageKey, parent: Option<PageKey>) -> bool;

    /// Record that a traversal touched a page this frame. Unknown keys
    /// turn into load requests.
    fn visit_page(&self, key: PageKey, parent: Option<PageKey>);
}

/// A traversal visitor that can route page requests through a handler.
pub trait PagingVisitor: Send + Sync {
    fn set_request_handler(&self, handler: Arc<dyn PageRequestHandler>);
}

/// A render-loop caller owning cull/update traversal visitors.
///
/// Both accessors default to `None`; wiring a pager into a caller that
/// exposes neither is a no-op.
pub trait PagingVisitorHost {
    fn as_cull_visitor(&self) -> Option<&dyn PagingVisitor> {
        None
    }

    fn as_update_visitor(&self) -> Option<&dyn PagingVisitor> {
        None
    }
}

/// One resident paged subgraph.
struct LoadedPage {
    node: Node,
    parent: Option<PageKey>,
    visited_frame: u64,
    last_visit: Instant,
}

/// The tile paging service.
pub struct TilePager {
    config: PagerConfig,
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    state: Mutex<PagerState>,
    loaded: Mutex<HashMap<PageKey, LoadedPage>>,
    listeners: Mutex<Vec<Arc<dyn TilesChangedListener>>>,
    frame: AtomicU64,
}

static INSTANCE: Mutex<Option<Arc<TilePager>>> = Mutex::new(None);

impl TilePager {
    // === Lifecycle ========================================================

    /// Create the process-wide pager.
    ///
    /// # Errors
    ///
    /// [`PagerError::AlreadyInitialized`] if a pager already exists;
    /// [`PagerError::WorkerSpawn`] if the worker thread cannot start.
    pub fn create(
        config: PagerConfig,
        loader: Arc<dyn PageLoader>,
    ) -> Result<Arc<TilePager>, PagerError> {
        let mut instance = INSTANCE.lock().expect("pager instance poisoned");
        if instance.is_some() {
            return Err(PagerError::AlreadyInitialized);
        }
        let pager = Self::standalone(config, loader)?;
        *instance = Some(Arc::clone(&pager));
        info!("tile pager created");
        Ok(pager)
    }

    /// The process-wide pager, if one has been created.
    pub fn instance() -> Option<Arc<TilePager>> {
        INSTANCE.lock().expect("pager instance poisoned").clone()
    }

    /// Tear down the process-wide pager.
    ///
    /// Idempotent: calling with no pager, or calling twice, is a no-op.
    /// Blocks until the worker thread is provably idle.
    pub fn destroy() {
        let taken = INSTANCE
            .lock()
            .expect("pager instance poisoned")
            .take();
        if let Some(pager) = taken {
            pager.shutdown();
            info!("tile pager destroyed");
        }
    }

    /// Create a free-standing pager not registered as the process-wide
    /// instance. The caller owns its lifecycle and calls
    /// [`TilePager::shutdown`] when done.
    ///
    /// # Errors
    ///
    /// [`PagerError::WorkerSpawn`] if the worker thread cannot start.
    pub fn standalone(
        config: PagerConfig,
        loader: Arc<dyn PageLoader>,
    ) -> Result<Arc<TilePager>, PagerError> {
        let shared = Arc::new(WorkerShared::new(
            config.accept_requests,
            config.paused,
            config.frame_blocking,
        ));
        let cancel = CancellationToken::new();

        // Marked running before the spawn so a destroy racing construction
        // still polls until the thread exits.
        shared.mark_running();
        let handle = std::thread::Builder::new()
            .name("tile-pager".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let cancel = cancel.clone();
                move || worker::run(shared, loader, cancel)
            })?;

        Ok(Arc::new(Self {
            config,
            shared,
            worker: Mutex::new(Some(handle)),
            cancel,
            state: Mutex::new(PagerState::Running),
            loaded: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            frame: AtomicU64::new(0),
        }))
    }

    /// Stop this pager: `Running → ShuttingDown → Stopped`.
    ///
    /// The steps run in a fixed order. The frame-blocking handshake is
    /// disabled first so nothing waits on a frame that will never come,
    /// then new requests are refused, then the worker is cancelled and
    /// polled with a coarse sleep until it reports not-running. Teardown
    /// failures are logged and suppressed; this call always completes.
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            if *state != PagerState::Running {
                return;
            }
            *state = PagerState::ShuttingDown;
        }
        debug!("tile pager shutting down");

        self.shared.set_frame_blocking(false);
        self.shared.set_accepting(false);
        self.cancel.cancel();
        self.shared.wake();

        while self.shared.is_running() {
            std::thread::sleep(self.config.destroy_poll);
        }

        let handle = self
            .worker
            .lock()
            .expect("pager worker handle poisoned")
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("pager worker thread panicked during shutdown");
            }
        }

        self.loaded.lock().expect("pager pages poisoned").clear();
        *self.state() = PagerState::Stopped;
    }

    /// Current lifecycle state.
    pub fn pager_state(&self) -> PagerState {
        *self.state()
    }

    fn state(&self) -> MutexGuard<'_, PagerState> {
        self.state.lock().expect("pager state poisoned")
    }

    // === Frame bracketing =================================================

    /// Top-of-frame step: advance the frame counter and merge every load
    /// the worker finished since the previous frame. Merged pages count as
    /// visited this frame, so they survive at least one eviction pass.
    /// Never blocks on the worker.
    pub fn pre_render(&self) {
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;
        let completed = self.shared.drain_completed();
        if completed.is_empty() {
            return;
        }

        let mut added = Vec::with_capacity(completed.len());
        {
            let mut loaded = self.loaded.lock().expect("pager pages poisoned");
            for page in completed {
                added.push((page.key, page.parent));
                loaded.insert(
                    page.key,
                    LoadedPage {
                        node: page.node,
                        parent: page.parent,
                        visited_frame: frame,
                        last_visit: Instant::now(),
                    },
                );
            }
        }

        for (key, parent) in added {
            self.notify_tile_added(key, parent);
        }
    }

    /// End-of-frame step: evict every page that was not visited this frame
    /// and has outlived the expiry delay.
    pub fn post_render(&self) {
        let frame = self.frame.load(Ordering::SeqCst);
        let expiry = self.config.expiry_delay;

        let mut evicted = Vec::new();
        {
            let mut loaded = self.loaded.lock().expect("pager pages poisoned");
            loaded.retain(|key, page| {
                if page.visited_frame == frame || page.last_visit.elapsed() < expiry {
                    true
                } else {
                    evicted.push((*key, page.parent));
                    false
                }
            });
        }

        for (key, parent) in evicted {
            debug!(key = %key, "page evicted");
            self.notify_tile_removed(key, parent);
        }
    }

    /// Wire this pager into the caller's traversal visitors so future
    /// traversals route paging requests here. A no-op when the caller
    /// exposes neither visitor.
    pub fn init_visitors(self: &Arc<Self>, caller: &dyn PagingVisitorHost) {
        let handler: Arc<dyn PageRequestHandler> = Arc::clone(self) as _;
        if let Some(visitor) = caller.as_cull_visitor() {
            visitor.set_request_handler(Arc::clone(&handler));
        }
        if let Some(visitor) = caller.as_update_visitor() {
            visitor.set_request_handler(handler);
        }
    }

    // === Requests & residency =============================================

    /// Whether new load requests are currently accepted.
    pub fn accepting_requests(&self) -> bool {
        self.shared.is_accepting()
    }

    /// Enable or disable new load requests.
    pub fn set_accepting_requests(&self, accepting: bool) {
        self.shared.set_accepting(accepting);
    }

    /// Pause or resume the worker.
    pub fn set_paused(&self, paused: bool) {
        self.shared.set_paused(paused);
    }

    /// Whether the worker is paused.
    pub fn paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Whether frame completion waits on pending loads.
    pub fn frame_blocking(&self) -> bool {
        self.shared.is_frame_blocking()
    }

    /// Number of queued, not yet started, load requests.
    pub fn queued_requests(&self) -> usize {
        self.shared.queued()
    }

    /// The resident subgraph for a key, if loaded.
    pub fn loaded_page(&self, key: PageKey) -> Option<Node> {
        self.loaded
            .lock()
            .expect("pager pages poisoned")
            .get(&key)
            .map(|page| page.node.clone())
    }

    /// Number of resident pages.
    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().expect("pager pages poisoned").len()
    }

    /// Register a listener for tile add/removal, typically a layer
    /// container tree.
    pub fn add_tiles_changed_listener(&self, listener: Arc<dyn TilesChangedListener>) {
        self.listeners
            .lock()
            .expect("pager listeners poisoned")
            .push(listener);
    }

    fn notify_tile_added(&self, key: PageKey, parent: Option<PageKey>) {
        let listeners = self
            .listeners
            .lock()
            .expect("pager listeners poisoned")
            .clone();
        for listener in listeners {
            listener.tile_add_notify(key, parent);
        }
    }

    fn notify_tile_removed(&self, key: PageKey, parent: Option<PageKey>) {
        let listeners = self
            .listeners
            .lock()
            .expect("pager listeners poisoned")
            .clone();
        for listener in listeners {
            listener.tile_removed_notify(key, parent);
        }
    }
}

impl PageRequestHandler for TilePager {
    fn request_page(&self, key: PageKey, parent: Option<PageKey>) -> bool {
        if *self.state() != PagerState::Running {
            return false;
        }
        self.shared.enqueue(PageRequest { key, parent })
    }

    fn visit_page(&self, key: PageKey, parent: Option<PageKey>) {
        let frame = self.frame.load(Ordering::SeqCst);
        {
            let mut loaded = self.loaded.lock().expect("pager pages poisoned");
            if let Some(page) = loaded.get_mut(&key) {
                page.visited_frame = frame;
                page.last_visit = Instant::now();
                return;
            }
        }
        // Visiting a page that is not resident asks for it to be loaded.
        self.request_page(key, parent);
    }
}

/// Scope guard that destroys the process-wide pager when dropped.
///
/// Held at the bottom of `main` so teardown happens at a well-defined
/// point instead of relying on static destruction order.
#[derive(Debug, Default)]
pub struct PagerShutdown;

impl Drop for PagerShutdown {
    fn drop(&mut self) {
        TilePager::destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Loader producing a leaf node per key, with a submission counter.
    struct LeafLoader {
        loads: AtomicUsize,
    }

    impl LeafLoader {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl PageLoader for LeafLoader {
        fn load_page(&self, key: PageKey, _cancel: &CancellationToken) -> Option<Node> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Some(Node::leaf(key.to_string()))
        }
    }

    /// Loader that parks until cancelled, for shutdown tests.
    struct BlockingLoader;

    impl PageLoader for BlockingLoader {
        fn load_page(&self, _key: PageKey, cancel: &CancellationToken) -> Option<Node> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            None
        }
    }

    fn wait_until(pager: &TilePager, target: usize) {
        for _ in 0..200 {
            pager.pre_render();
            if pager.loaded_count() >= target {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("page never loaded");
    }

    #[test]
    fn test_requested_page_becomes_resident() {
        let pager =
            TilePager::standalone(PagerConfig::default(), Arc::new(LeafLoader::new()))
                .expect("pager should start");

        let key = PageKey::new(2, 1, 3);
        assert!(pager.request_page(key, None));
        wait_until(&pager, 1);

        let node = pager.loaded_page(key).expect("page should be resident");
        assert_eq!(node.label(), "L2/1/3");
        pager.shutdown();
    }

    #[test]
    fn test_duplicate_request_is_refused_while_pending() {
        let pager = TilePager::standalone(PagerConfig::default(), Arc::new(BlockingLoader))
            .expect("pager should start");

        let key = PageKey::new(1, 0, 0);
        assert!(pager.request_page(key, None));
        assert!(!pager.request_page(key, None));
        pager.shutdown();
    }

    #[test]
    fn test_unvisited_page_is_evicted_next_frame() {
        let pager =
            TilePager::standalone(PagerConfig::default(), Arc::new(LeafLoader::new()))
                .expect("pager should start");

        let key = PageKey::new(3, 2, 1);
        pager.request_page(key, None);
        wait_until(&pager, 1);

        // Merged pages count as visited on their merge frame.
        pager.post_render();
        assert_eq!(pager.loaded_count(), 1);

        // Next frame, nothing visits the page; zero expiry evicts it.
        pager.pre_render();
        pager.post_render();
        assert_eq!(pager.loaded_count(), 0);
        pager.shutdown();
    }

    #[test]
    fn test_visited_page_survives_eviction() {
        let pager =
            TilePager::standalone(PagerConfig::default(), Arc::new(LeafLoader::new()))
                .expect("pager should start");

        let key = PageKey::new(3, 2, 1);
        pager.request_page(key, None);
        wait_until(&pager, 1);
        pager.post_render();

        for _ in 0..3 {
            pager.pre_render();
            pager.visit_page(key, None);
            pager.post_render();
            assert_eq!(pager.loaded_count(), 1);
        }
        pager.shutdown();
    }

    #[test]
    fn test_visiting_unknown_page_requests_it() {
        let loader = Arc::new(LeafLoader::new());
        let pager = TilePager::standalone(
            PagerConfig::default(),
            Arc::clone(&loader) as Arc<dyn PageLoader>,
        )
            .expect("pager should start");

        pager.visit_page(PageKey::new(4, 0, 0), Some(PageKey::new(3, 0, 0)));
        wait_until(&pager, 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        pager.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_drains_worker() {
        let pager = TilePager::standalone(PagerConfig::default(), Arc::new(BlockingLoader))
            .expect("pager should start");
        pager.request_page(PageKey::new(5, 0, 0), None);

        pager.shutdown();
        assert_eq!(pager.pager_state(), PagerState::Stopped);
        assert!(!pager.request_page(PageKey::new(5, 0, 1), None));

        // Second teardown must neither hang nor panic.
        pager.shutdown();
        assert_eq!(pager.pager_state(), PagerState::Stopped);
    }

    #[test]
    fn test_requests_refused_when_disabled() {
        let config = PagerConfig {
            accept_requests: false,
            ..PagerConfig::default()
        };
        let pager = TilePager::standalone(config, Arc::new(LeafLoader::new()))
            .expect("pager should start");

        assert!(!pager.request_page(PageKey::new(0, 0, 0), None));
        pager.set_accepting_requests(true);
        assert!(pager.request_page(PageKey::new(0, 0, 0), None));
        pager.shutdown();
    }

    #[test]
    fn test_init_visitors_wires_exposed_visitors_only() {
        use std::sync::Mutex as StdMutex;

        struct RecordingVisitor {
            handler: StdMutex<Option<Arc<dyn PageRequestHandler>>>,
        }

        impl PagingVisitor for RecordingVisitor {
            fn set_request_handler(&self, handler: Arc<dyn PageRequestHandler>) {
                *self.handler.lock().expect("visitor poisoned") = Some(handler);
            }
        }

        struct CullOnlyHost {
            cull: RecordingVisitor,
        }

        impl PagingVisitorHost for CullOnlyHost {
            fn as_cull_visitor(&self) -> Option<&dyn PagingVisitor> {
                Some(&self.cull)
            }
        }

        struct BareHost;
        impl PagingVisitorHost for BareHost {}

        let pager =
            TilePager::standalone(PagerConfig::default(), Arc::new(LeafLoader::new()))
                .expect("pager should start");

        let host = CullOnlyHost {
            cull: RecordingVisitor {
                handler: StdMutex::new(None),
            },
        };
        pager.init_visitors(&host);
        assert!(host.cull.handler.lock().expect("visitor poisoned").is_some());

        // A host with no visitors is silently skipped.
        pager.init_visitors(&BareHost);
        pager.shutdown();
    }
}
