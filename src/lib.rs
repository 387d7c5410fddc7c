//! GlobeScene - layer composition and tile paging for a virtual-globe viewer
//!
//! This library provides the scene-assembly core that backs an interactive
//! globe viewer: a tree of heterogeneous data layers that aggregates into a
//! single renderable scene on demand, propagates dirty state instead of
//! rebuilding on every change, streams paged tile content on a background
//! thread, and answers spatial queries across the whole tree.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Owning document / GUI                   │
//! │   mutates containers, drives update_notify once per frame   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Container                            │
//! │  ordered children · dirty flags · lazy scene rebuild        │
//! │  id index · builder / update-listener registries            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                 │
//!            ▼                                 ▼
//! ┌────────────────────────┐     ┌────────────────────────────┐
//! │      TilePager         │     │       JobScheduler         │
//! │  background worker,    │     │  async vector-tile jobs    │
//! │  visitation eviction   │     │  (fire-and-forget)         │
//! └────────────────────────┘     └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use globescene::container::Container;
//! use globescene::layer::FrameContext;
//!
//! let root = Container::new("globe");
//! root.add(my_raster_layer, true);
//! root.add(my_vector_layer, true);
//!
//! // Once per frame:
//! let ctx = FrameContext::new(frame_number, reference_time);
//! root.update_notify(&ctx);
//! let scene = root.scene_root();
//! ```

pub mod container;
pub mod extents;
pub mod jobs;
pub mod layer;
pub mod logging;
pub mod pager;
pub mod scene;

/// Version of the GlobeScene library, injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
