//! Layer capability model.
//!
//! A layer is a polymorphic unit of visual/spatial content. Every layer
//! reports a display name and a visibility flag; everything else is an
//! optional capability discovered at runtime through the `as_*` accessors
//! on [`Layer`], which default to `None`. Fan-out operations on a container
//! are all shaped the same way: for each child, if the capability is
//! present, call it; children lacking the capability are silently skipped.
//!
//! Layers are shared by reference count ([`LayerRef`]): the same layer may
//! be reachable from several containers (a main tree and a favorites list,
//! say) with no single owner. Mutating shared layer state is visible to all
//! holders immediately; containers never clone children.

mod intersect;

pub use intersect::{ClosestHit, HitPath, IntersectQuery, Point3};

use std::fmt;
use std::sync::Arc;

use crate::extents::Extents;
use crate::jobs::{JobHandle, JobScheduler};
use crate::scene::{Node, PageKey};

/// Reference-counted handle to a layer.
pub type LayerRef = Arc<dyn Layer>;

/// Stable identifier a layer may expose for O(1) lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerId(String);

impl LayerId {
    /// Create an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-frame context handed down from the owning document.
///
/// Passed through update and query fan-outs unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext {
    /// Monotonically increasing frame number.
    pub frame: u64,
    /// Reference time of the frame, in seconds.
    pub reference_time: f64,
}

impl FrameContext {
    /// Create a frame context.
    pub fn new(frame: u64, reference_time: f64) -> Self {
        Self {
            frame,
            reference_time,
        }
    }
}

/// An elevation patch delivered to elevation-change listeners.
///
/// The engine carries the patch opaquely; interpretation belongs to the
/// listening layers.
#[derive(Debug, Clone)]
pub struct ElevationPatch {
    /// Geographic coverage of the patch.
    pub extents: Extents,
    /// Raw elevation samples, row-major.
    pub samples: Arc<[f32]>,
}

/// A unit of visual/spatial content participating in zero or more optional
/// capabilities.
pub trait Layer: Send + Sync {
    /// Display name.
    fn name(&self) -> String;

    /// Visibility flag. Hidden layers contribute nothing to scene rebuilds.
    fn show_layer(&self) -> bool {
        true
    }

    /// Stable identifier, if the layer exposes one.
    fn layer_id(&self) -> Option<LayerId> {
        None
    }

    /// Description of this layer for persisted layouts, or `None` if the
    /// layer is not persistable. Non-persistable layers are skipped when a
    /// container captures its layout.
    fn layout_descriptor(&self) -> Option<crate::container::LayerDescriptor> {
        None
    }

    /// Geographic extents capability.
    fn as_layer_extents(&self) -> Option<&dyn LayerExtents> {
        None
    }

    /// Scene-building capability.
    fn as_build_scene(&self) -> Option<&dyn BuildScene> {
        None
    }

    /// Per-frame update capability.
    fn as_update_listener(&self) -> Option<&dyn UpdateListener> {
        None
    }

    /// Boolean-state (checkbox) capability.
    fn as_boolean_state(&self) -> Option<&dyn BooleanState> {
        None
    }

    /// Tiled-vector-data capability.
    fn as_tile_vector_data(&self) -> Option<&dyn TileVectorData> {
        None
    }

    /// Tile lifecycle listening capability.
    fn as_tiles_changed_listener(&self) -> Option<&dyn TilesChangedListener> {
        None
    }

    /// Intersection-query capability.
    fn as_intersect_notify(&self) -> Option<&dyn IntersectNotify> {
        None
    }

    /// Spatial sub-query capability.
    fn as_within_extents(&self) -> Option<&dyn WithinExtents> {
        None
    }

    /// Elevation-change listening capability.
    fn as_elevation_listener(&self) -> Option<&dyn ElevationChangedListener> {
        None
    }

    /// Child-traversal capability (composites).
    fn as_traversable(&self) -> Option<&dyn Traverse> {
        None
    }
}

/// Reports geographic extents.
pub trait LayerExtents: Send + Sync {
    /// The layer's bounding box; may be the null sentinel when unknown.
    fn extents(&self) -> Extents;
}

/// Builds an opaque scene fragment on demand.
pub trait BuildScene: Send + Sync {
    /// Build the fragment, or `None` if there is currently nothing to show.
    ///
    /// A `None` return is not an error; the layer is simply omitted from
    /// the assembled scene.
    fn build_scene(&self, ctx: &FrameContext) -> Option<Node>;
}

/// Receives a callback once per frame.
pub trait UpdateListener: Send + Sync {
    /// Called once per frame by the owning container, in container order.
    fn update_notify(&self, ctx: &FrameContext);
}

/// Checkbox-style boolean state, cascaded by container broadcast.
pub trait BooleanState: Send + Sync {
    /// Current state.
    fn get_boolean_state(&self) -> bool;

    /// Set the state. Containers broadcast the same value to every child
    /// exposing this capability.
    fn set_boolean_state(&self, state: bool);
}

/// Streams per-tile vector data through the job scheduler.
pub trait TileVectorData: Send + Sync {
    /// Enqueue jobs covering the given tile extents at the given level and
    /// return their handles. Fire-and-forget: rate limiting and deduping
    /// belong to the scheduler and the layer, not the caller.
    fn launch_vector_jobs(
        &self,
        extents: Extents,
        level: u32,
        scheduler: &dyn JobScheduler,
        ctx: &FrameContext,
    ) -> Vec<JobHandle>;

    /// Whether the given level falls within this layer's range of levels.
    fn is_in_level_range(&self, _level: u32) -> bool {
        true
    }
}

/// Listens for paged tiles entering and leaving the scene.
pub trait TilesChangedListener: Send + Sync {
    /// A tile was added under `parent`.
    fn tile_add_notify(&self, child: PageKey, parent: Option<PageKey>);

    /// A tile was removed from under `parent`.
    fn tile_removed_notify(&self, child: PageKey, parent: Option<PageKey>);
}

/// Participates in nearest-feature intersection queries.
pub trait IntersectNotify: Send + Sync {
    /// Offer the layer a chance to improve on the closest hit so far.
    ///
    /// An implementation that registers a hit must write its distance and
    /// its own root-to-leaf path (typically just itself) into `closest`.
    fn intersect_notify(&self, query: &IntersectQuery, ctx: &FrameContext, closest: &mut ClosestHit);
}

/// Answers spatial sub-queries with a filtered view of its contents.
pub trait WithinExtents: Send + Sync {
    /// Items of this layer within the box, or `None` when nothing matched.
    fn items_within_extents(&self, extents: Extents, ctx: &FrameContext) -> Option<LayerRef>;
}

/// Listens for elevation changes within some extents.
pub trait ElevationChangedListener: Send + Sync {
    /// Elevation changed within `extents` at the given level. Returns true
    /// if this layer handled the change.
    fn elevation_changed_notify(
        &self,
        extents: Extents,
        level: u32,
        patch: &ElevationPatch,
        ctx: &FrameContext,
    ) -> bool;
}

/// Listens for container mutations (used by GUI trees to refresh without
/// polling).
pub trait DataChangedListener: Send + Sync {
    /// The given container's contents changed.
    fn data_changed_notify(&self, source: &LayerRef);
}

/// Visitor over a layer tree.
pub trait LayerVisitor {
    /// Called for every layer encountered, in traversal order.
    fn visit(&mut self, layer: &LayerRef);
}

/// Composite layers that can walk their children.
pub trait Traverse: Send + Sync {
    /// Visit each child in order, recursing into nested composites.
    fn traverse(&self, visitor: &mut dyn LayerVisitor);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareLayer;

    impl Layer for BareLayer {
        fn name(&self) -> String {
            "bare".to_string()
        }
    }

    #[test]
    fn test_capabilities_default_to_none() {
        let layer = BareLayer;
        assert!(layer.as_layer_extents().is_none());
        assert!(layer.as_build_scene().is_none());
        assert!(layer.as_update_listener().is_none());
        assert!(layer.as_boolean_state().is_none());
        assert!(layer.as_tile_vector_data().is_none());
        assert!(layer.as_tiles_changed_listener().is_none());
        assert!(layer.as_intersect_notify().is_none());
        assert!(layer.as_within_extents().is_none());
        assert!(layer.as_elevation_listener().is_none());
        assert!(layer.as_traversable().is_none());
        assert!(layer.layer_id().is_none());
        assert!(layer.show_layer());
    }

    #[test]
    fn test_layer_id_display() {
        let id = LayerId::new("roads-ne");
        assert_eq!(id.to_string(), "roads-ne");
        assert_eq!(id.as_str(), "roads-ne");
    }
}
