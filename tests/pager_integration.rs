//! Integration tests for the tile pager lifecycle.
//!
//! The process-wide pager is global state, so the whole create → render →
//! destroy lifecycle runs inside a single test; per-feature behavior is
//! covered by unit tests against free-standing pagers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use globescene::container::Container;
use globescene::layer::{Layer, TilesChangedListener};
use globescene::pager::{
    PageLoader, PageRequestHandler, PagerConfig, PagerShutdown, PagerState, TilePager,
};
use globescene::scene::{Node, PageKey};

/// Loader that produces a leaf node per key.
struct LeafLoader;

impl PageLoader for LeafLoader {
    fn load_page(&self, key: PageKey, _cancel: &CancellationToken) -> Option<Node> {
        Some(Node::leaf(key.to_string()))
    }
}

/// Layer that records tile lifecycle events.
struct TileRecorder {
    added: AtomicUsize,
    removed: AtomicUsize,
    last: Mutex<Option<PageKey>>,
}

impl TileRecorder {
    fn new() -> Self {
        Self {
            added: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }
}

impl Layer for TileRecorder {
    fn name(&self) -> String {
        "tile-recorder".to_string()
    }

    fn as_tiles_changed_listener(&self) -> Option<&dyn TilesChangedListener> {
        Some(self)
    }
}

impl TilesChangedListener for TileRecorder {
    fn tile_add_notify(&self, child: PageKey, _parent: Option<PageKey>) {
        self.added.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(child);
    }

    fn tile_removed_notify(&self, _child: PageKey, _parent: Option<PageKey>) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

fn pump_until_loaded(pager: &TilePager, target: usize) {
    for _ in 0..200 {
        pager.pre_render();
        if pager.loaded_count() >= target {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("pages never loaded");
}

#[test]
fn test_process_wide_pager_lifecycle() {
    // Created once; a second create is refused while the first lives.
    let pager =
        TilePager::create(PagerConfig::default(), Arc::new(LeafLoader)).expect("pager starts");
    assert!(TilePager::create(PagerConfig::default(), Arc::new(LeafLoader)).is_err());

    let instance = TilePager::instance().expect("instance available");
    assert!(Arc::ptr_eq(&pager, &instance));
    assert_eq!(pager.pager_state(), PagerState::Running);

    // Wire the pager's tile notifications into a container tree.
    let root = Container::new("globe");
    let recorder = Arc::new(TileRecorder::new());
    root.add(Arc::clone(&recorder) as Arc<dyn Layer>, true);
    pager.add_tiles_changed_listener(Arc::clone(&root) as Arc<dyn TilesChangedListener>);

    // Request a page, pump frames until it is resident.
    let key = PageKey::new(4, 3, 7);
    assert!(pager.request_page(key, Some(PageKey::new(3, 1, 3))));
    pump_until_loaded(&pager, 1);
    assert_eq!(recorder.added.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.last.lock().unwrap(), Some(key));

    // Keep it alive by visiting, then let it expire.
    pager.post_render();
    pager.pre_render();
    pager.visit_page(key, None);
    pager.post_render();
    assert_eq!(pager.loaded_count(), 1);

    pager.pre_render();
    pager.post_render();
    assert_eq!(pager.loaded_count(), 0);
    assert_eq!(recorder.removed.load(Ordering::SeqCst), 1);

    // Destroy twice: the second call must neither hang nor panic.
    TilePager::destroy();
    assert!(TilePager::instance().is_none());
    assert_eq!(pager.pager_state(), PagerState::Stopped);
    TilePager::destroy();

    // The shutdown guard is a no-op once the pager is gone.
    drop(PagerShutdown);

    // A fresh pager can be created after a full teardown.
    let again =
        TilePager::create(PagerConfig::default(), Arc::new(LeafLoader)).expect("pager restarts");
    {
        // Guard-based teardown, as a host's main would use it.
        let _guard = PagerShutdown;
    }
    assert!(TilePager::instance().is_none());
    assert_eq!(again.pager_state(), PagerState::Stopped);
}
