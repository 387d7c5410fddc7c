//! Layer containers.
//!
//! A [`Container`] is a layer that owns an ordered collection of child
//! layers, tracks three independent dirty flags, rebuilds an aggregate
//! scene lazily, and fans cross-cutting notifications (tile lifecycle,
//! elevation changes, intersection queries) out to capability-matching
//! children.
//!
//! # Locking
//!
//! Each container has one primary mutex guarding children, flags, the
//! assembled scene and the id index. The builder and update-listener
//! registries are separately locked, so rebuilding the scene and
//! delivering per-frame updates never hold the primary lock across a
//! child callback; a callback that re-enters the container to mutate
//! siblings must not deadlock.
//!
//! # Ordering
//!
//! Child traversal order (add order) is preserved across rebuild, update
//! dispatch and every fan-out. Z-order and "first closest wins ties"
//! determinism rely on this.

mod layout;
mod registry;

pub use layout::{ContainerLayout, LayerDescriptor, LayerFactory, CONTAINER_KIND};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::extents::Extents;
use crate::jobs::{JobHandle, JobScheduler};
use crate::layer::{
    BooleanState, BuildScene, ClosestHit, DataChangedListener, ElevationChangedListener,
    ElevationPatch, FrameContext, IntersectNotify, IntersectQuery, Layer, LayerExtents, LayerId,
    LayerRef, LayerVisitor, TileVectorData, TilesChangedListener, Traverse, UpdateListener,
    WithinExtents,
};
use crate::scene::{Group, Node, PageKey};

use registry::Registry;

bitflags! {
    /// Dirty bits gating expensive recomputations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u8 {
        /// Layer data is stale.
        const DATA = 0b001;
        /// Cached extents are stale.
        const EXTENTS = 0b010;
        /// The assembled scene is stale.
        const SCENE = 0b100;
        /// Everything is stale.
        const ALL = Self::DATA.bits() | Self::EXTENTS.bits() | Self::SCENE.bits();
    }
}

/// Primary state, guarded by the container's one main mutex.
struct State {
    name: String,
    id: Option<LayerId>,
    shown: bool,
    flags: DirtyFlags,
    children: Vec<LayerRef>,
    id_index: HashMap<LayerId, LayerRef>,
    extents: Extents,
    comments: Vec<String>,
}

/// A layer that is also an ordered composite of child layers.
pub struct Container {
    state: Mutex<State>,
    root: Group,
    builders: Registry<dyn Layer>,
    update_listeners: Registry<dyn Layer>,
    data_changed_listeners: Registry<dyn DataChangedListener>,
    self_ref: Weak<Container>,
}

impl Container {
    /// Create an empty, visible container.
    ///
    /// All dirty flags start set so the first update performs a real
    /// rebuild.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// Create a container that exposes a stable identifier.
    pub fn with_id(name: impl Into<String>, id: LayerId) -> Arc<Self> {
        Self::build(name.into(), Some(id))
    }

    fn build(name: String, id: Option<LayerId>) -> Arc<Self> {
        let root = Group::new(name.clone());
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(State {
                name,
                id,
                shown: true,
                flags: DirtyFlags::ALL,
                children: Vec::new(),
                id_index: HashMap::new(),
                extents: Extents::null(),
                comments: Vec::new(),
            }),
            root,
            builders: Registry::new(),
            update_listeners: Registry::new(),
            data_changed_listeners: Registry::new(),
            self_ref: weak.clone(),
        })
    }

    /// Duplicate this container: same children (shared, not cloned), same
    /// name and visibility, scene forced dirty so the copy rebuilds on its
    /// first update.
    pub fn duplicate(&self) -> Arc<Self> {
        let (name, id, shown, children, comments) = {
            let state = self.state();
            (
                state.name.clone(),
                state.id.clone(),
                state.shown,
                state.children.clone(),
                state.comments.clone(),
            )
        };
        let copy = Self::build(name, id);
        {
            let mut state = copy.state();
            state.shown = shown;
            state.comments = comments;
        }
        for child in children {
            copy.add(child, false);
        }
        copy
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("container state poisoned")
    }

    /// This container as a shared layer handle.
    fn handle(&self) -> Option<LayerRef> {
        self.self_ref.upgrade().map(|c| c as LayerRef)
    }

    // === Identity & visibility ============================================

    /// Display name.
    pub fn container_name(&self) -> String {
        self.state().name.clone()
    }

    /// Rename the container and notify data-changed listeners.
    pub fn set_name(&self, name: impl Into<String>) {
        self.state().name = name.into();
        self.notify_data_changed();
    }

    /// Whether the container is shown.
    pub fn is_shown(&self) -> bool {
        self.state().shown
    }

    /// Show or hide the container. Marks the scene dirty either way.
    pub fn set_shown(&self, shown: bool) {
        let mut state = self.state();
        state.shown = shown;
        state.flags |= DirtyFlags::SCENE;
    }

    /// Attach a free-form comment, carried through persisted layouts.
    pub fn add_comment(&self, comment: impl Into<String>) {
        self.state().comments.push(comment.into());
    }

    /// The attached comments, in order.
    pub fn comments(&self) -> Vec<String> {
        self.state().comments.clone()
    }

    // === Dirty flags ======================================================

    /// Current dirty flags.
    pub fn flags(&self) -> DirtyFlags {
        self.state().flags
    }

    /// Whether layer data is stale.
    pub fn dirty_data(&self) -> bool {
        self.state().flags.contains(DirtyFlags::DATA)
    }

    /// Set or clear the data-dirty bit.
    pub fn set_dirty_data(&self, dirty: bool) {
        self.state().flags.set(DirtyFlags::DATA, dirty);
    }

    /// Whether the cached extents are stale.
    pub fn dirty_extents(&self) -> bool {
        self.state().flags.contains(DirtyFlags::EXTENTS)
    }

    /// Set or clear the extents-dirty bit.
    pub fn set_dirty_extents(&self, dirty: bool) {
        self.state().flags.set(DirtyFlags::EXTENTS, dirty);
    }

    /// Whether the assembled scene is stale.
    pub fn dirty_scene(&self) -> bool {
        self.state().flags.contains(DirtyFlags::SCENE)
    }

    /// Set or clear the scene-dirty bit.
    pub fn set_dirty_scene(&self, dirty: bool) {
        self.state().flags.set(DirtyFlags::SCENE, dirty);
    }

    // === Composition ======================================================

    /// Append a child layer.
    ///
    /// The child lands in the ordered collection, in the id index if it
    /// exposes a stable id, and in the builder/update registries for the
    /// capabilities it exposes. Nothing is recomputed eagerly; the scene is
    /// marked dirty instead. Duplicate insertion is allowed and the child
    /// simply appears twice in traversal.
    ///
    /// When `notify` is true, data-changed listeners are fired (bulk loads
    /// and query results pass false).
    pub fn add(&self, layer: LayerRef, notify: bool) {
        // Child callbacks run before the primary lock is taken.
        let child_extents = layer.as_layer_extents().map(|e| e.extents());
        let child_id = layer.layer_id();

        {
            let mut state = self.state();
            state.children.push(Arc::clone(&layer));
            if let Some(id) = child_id {
                state.id_index.insert(id, Arc::clone(&layer));
            }
            if let Some(extents) = child_extents {
                state.extents.expand(extents);
            }
            state.flags |= DirtyFlags::SCENE;
        }

        if layer.as_update_listener().is_some() {
            self.update_listeners.add(Arc::clone(&layer));
        }
        if layer.as_build_scene().is_some() {
            self.builders.add(Arc::clone(&layer));
        }

        trace!(layer = %layer.name(), notify, "layer added");

        if notify {
            self.notify_data_changed();
        }
    }

    /// Remove the first occurrence of a child layer.
    ///
    /// Removing an absent layer is a silent no-op. Duplicates are removed
    /// one occurrence at a time.
    pub fn remove(&self, layer: &LayerRef) {
        {
            let mut state = self.state();
            if let Some(pos) = state
                .children
                .iter()
                .position(|c| Arc::ptr_eq(c, layer))
            {
                state.children.remove(pos);
            }
            if let Some(id) = layer.layer_id() {
                state.id_index.remove(&id);
            }
            state.flags |= DirtyFlags::SCENE | DirtyFlags::EXTENTS;
        }

        self.update_listeners.remove(layer);
        self.builders.remove(layer);

        trace!(layer = %layer.name(), "layer removed");

        self.notify_data_changed();
    }

    /// Remove every child, emptying all four collections.
    pub fn clear(&self) {
        {
            let mut state = self.state();
            state.children.clear();
            state.id_index.clear();
            // Secondary registries are cleared while the primary lock is
            // held so no traversal observes a half-cleared container.
            self.builders.clear();
            self.update_listeners.clear();
            state.flags |= DirtyFlags::SCENE | DirtyFlags::EXTENTS;
        }

        debug!(container = %self.container_name(), "container cleared");

        self.notify_data_changed();
    }

    /// Number of children, counting duplicates.
    pub fn len(&self) -> usize {
        self.state().children.len()
    }

    /// True when the container has no children.
    pub fn is_empty(&self) -> bool {
        self.state().children.is_empty()
    }

    /// Snapshot of the children in order.
    pub fn children(&self) -> Vec<LayerRef> {
        self.state().children.clone()
    }

    /// O(1) lookup by stable identifier. Missing ids yield `None`, never
    /// an error.
    pub fn find(&self, id: &LayerId) -> Option<LayerRef> {
        self.state().id_index.get(id).cloned()
    }

    /// Number of children registered as scene builders.
    pub fn builder_count(&self) -> usize {
        self.builders.len()
    }

    /// Number of children registered as per-frame update listeners.
    pub fn update_listener_count(&self) -> usize {
        self.update_listeners.len()
    }

    // === Extents ==========================================================

    /// Fold every extents-capable child into one box.
    ///
    /// Always O(children); never cached here. Callers needing a cache use
    /// [`Container::extents`] or snapshot the result themselves.
    pub fn calculate_extents(&self) -> Extents {
        let children = self.children();
        let mut extents = Extents::null();
        for child in &children {
            if let Some(e) = child.as_layer_extents() {
                extents.expand(e.extents());
            }
        }
        extents
    }

    /// The container's extents, recomputed only when the extents-dirty bit
    /// is set.
    pub fn extents(&self) -> Extents {
        if self.dirty_extents() {
            let fresh = self.calculate_extents();
            let mut state = self.state();
            state.extents = fresh;
            state.flags.remove(DirtyFlags::EXTENTS);
        }
        self.state().extents
    }

    // === Frame update & scene assembly ====================================

    /// Per-frame entry point, called once per frame by the owning document.
    ///
    /// Rebuilds the scene if it is dirty, or if the assembled child count
    /// disagrees with the builder registry (defensive re-check), then
    /// invokes every registered update listener exactly once in container
    /// order, passing the context through unchanged.
    pub fn update_notify(&self, ctx: &FrameContext) {
        // The registries have their own mutexes; no primary lock is needed
        // to consult them.
        let needs_build = self.root.child_count() != self.builders.len();

        if self.dirty_scene() || needs_build {
            self.rebuild_scene(ctx);
        }

        for listener in self.update_listeners.snapshot() {
            if let Some(update) = listener.as_update_listener() {
                update.update_notify(ctx);
            }
        }
    }

    /// The assembled scene fragment.
    ///
    /// The handle stays valid across rebuilds; rebuilding mutates the
    /// group's children in place.
    pub fn scene_root(&self) -> Node {
        self.root.node()
    }

    /// Re-derive the full scene from current children.
    ///
    /// Not incremental: every call rebuilds `root` from scratch, which
    /// keeps ordering correct under arbitrary child reordering. A hidden
    /// container contributes nothing but still clears the dirty bit, so
    /// becoming visible again triggers a real rebuild.
    fn rebuild_scene(&self, ctx: &FrameContext) {
        let (name, shown) = {
            let state = self.state();
            (state.name.clone(), state.shown)
        };

        self.root.set_label(name);
        self.root.clear_children();

        if shown {
            for builder in self.builders.snapshot() {
                if !builder.show_layer() {
                    continue;
                }
                let Some(build) = builder.as_build_scene() else {
                    continue;
                };
                // A child that builds nothing is omitted, not an error.
                if let Some(node) = build.build_scene(ctx) {
                    self.root.add_child(node);
                }
            }
        }

        trace!(
            container = %self.container_name(),
            fragments = self.root.child_count(),
            shown,
            "scene rebuilt"
        );

        self.set_dirty_scene(false);
    }

    // === Boolean-state broadcast ==========================================

    /// The container's own boolean state (its visibility).
    pub fn boolean_state(&self) -> bool {
        self.is_shown()
    }

    /// Set the container's visibility and broadcast the same state to
    /// every child exposing the boolean-state capability.
    ///
    /// This is a broadcast, not a logical AND/OR of children.
    pub fn broadcast_boolean_state(&self, state: bool) {
        self.set_shown(state);

        for child in self.children() {
            if let Some(b) = child.as_boolean_state() {
                b.set_boolean_state(state);
            }
        }
    }

    // === Spatial queries ==================================================

    /// The children within the given box, as a new container.
    ///
    /// Children that support spatial sub-querying are recursively
    /// filtered; children that only expose extents are included iff their
    /// centroid lies inside the box. Returns `None` when nothing matched.
    /// The result container is populated without firing data-changed
    /// events (it is a query result, not a mutation).
    pub fn items_within_extents(
        &self,
        extents: Extents,
        ctx: &FrameContext,
    ) -> Option<Arc<Container>> {
        let result = Container::new(self.container_name());

        for child in self.children() {
            if let Some(within) = child.as_within_extents() {
                if let Some(contained) = within.items_within_extents(extents, ctx) {
                    result.add(contained, false);
                }
            } else if let Some(le) = child.as_layer_extents() {
                if extents.contains(le.extents().center()) {
                    result.add(Arc::clone(&child), false);
                }
            }
        }

        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Fan a nearest-feature query to every capable child, keeping the
    /// globally closest hit.
    ///
    /// When a child improves on the current best and reports a non-empty
    /// path, this container prepends its own handle exactly once and
    /// replaces the accumulated path, building the root-to-leaf path
    /// bottom-up.
    pub fn intersect_notify(
        &self,
        query: &IntersectQuery,
        ctx: &FrameContext,
        answer: &mut ClosestHit,
    ) {
        for child in self.children() {
            let Some(notify) = child.as_intersect_notify() else {
                continue;
            };

            let mut closest = ClosestHit::none();
            notify.intersect_notify(query, ctx, &mut closest);

            if closest.distance < answer.distance && !closest.path.is_empty() {
                let mut path = Vec::with_capacity(closest.path.len() + 1);
                if let Some(me) = self.handle() {
                    path.push(me);
                }
                path.extend(closest.path);
                answer.path = path;
                answer.point = closest.point;
                answer.distance = closest.distance;
            }
        }
    }

    // === Tile & elevation fan-out =========================================

    /// Tell every tile-lifecycle listener that a tile was added. Pure
    /// fan-out: no filtering, no dedup.
    pub fn tile_add_notify(&self, child: PageKey, parent: Option<PageKey>) {
        for layer in self.children() {
            if let Some(listener) = layer.as_tiles_changed_listener() {
                listener.tile_add_notify(child, parent);
            }
        }
    }

    /// Tell every tile-lifecycle listener that a tile was removed.
    pub fn tile_removed_notify(&self, child: PageKey, parent: Option<PageKey>) {
        for layer in self.children() {
            if let Some(listener) = layer.as_tiles_changed_listener() {
                listener.tile_removed_notify(child, parent);
            }
        }
    }

    /// Elevation changed within the given extents. Any child that handles
    /// the change marks this container's scene dirty.
    pub fn elevation_changed_notify(
        &self,
        extents: Extents,
        level: u32,
        patch: &ElevationPatch,
        ctx: &FrameContext,
    ) -> bool {
        let mut handled = false;
        for child in self.children() {
            if let Some(listener) = child.as_elevation_listener() {
                handled |= listener.elevation_changed_notify(extents, level, patch, ctx);
            }
        }

        if handled {
            self.set_dirty_scene(true);
        }
        handled
    }

    /// Ask every tiled-vector child to enqueue its jobs on the scheduler
    /// and concatenate the returned handles.
    ///
    /// The container neither rate-limits nor dedupes; that belongs to the
    /// scheduler and to each child.
    pub fn launch_vector_jobs(
        &self,
        extents: Extents,
        level: u32,
        scheduler: &dyn JobScheduler,
        ctx: &FrameContext,
    ) -> Vec<JobHandle> {
        let mut handles = Vec::new();
        for child in self.children() {
            if let Some(vector) = child.as_tile_vector_data() {
                if !vector.is_in_level_range(level) {
                    continue;
                }
                handles.extend(vector.launch_vector_jobs(extents, level, scheduler, ctx));
            }
        }
        handles
    }

    // === Data-changed listeners ===========================================

    /// Register a data-changed listener. The listener registry has its own
    /// mutex; no primary lock is taken.
    pub fn add_data_changed_listener(&self, listener: Arc<dyn DataChangedListener>) {
        self.data_changed_listeners.add(listener);
    }

    /// Unregister a data-changed listener.
    pub fn remove_data_changed_listener(&self, listener: &Arc<dyn DataChangedListener>) {
        self.data_changed_listeners.remove(listener);
    }

    fn notify_data_changed(&self) {
        let Some(source) = self.handle() else {
            return;
        };
        for listener in self.data_changed_listeners.snapshot() {
            listener.data_changed_notify(&source);
        }
    }

    // === Traversal ========================================================

    /// Visit every child in order, recursing into nested composites.
    pub fn traverse(&self, visitor: &mut dyn LayerVisitor) {
        for child in self.children() {
            visitor.visit(&child);
            if let Some(nested) = child.as_traversable() {
                nested.traverse(visitor);
            }
        }
    }
}

// === Capability wiring ====================================================
//
// A container participates in its parent's fan-outs through the same
// capability surface as any other layer.

impl Layer for Container {
    fn name(&self) -> String {
        self.container_name()
    }

    fn show_layer(&self) -> bool {
        self.is_shown()
    }

    fn layer_id(&self) -> Option<LayerId> {
        self.state().id.clone()
    }

    fn layout_descriptor(&self) -> Option<LayerDescriptor> {
        Some(self.container_descriptor())
    }

    fn as_layer_extents(&self) -> Option<&dyn LayerExtents> {
        Some(self)
    }

    fn as_build_scene(&self) -> Option<&dyn BuildScene> {
        Some(self)
    }

    fn as_update_listener(&self) -> Option<&dyn UpdateListener> {
        Some(self)
    }

    fn as_boolean_state(&self) -> Option<&dyn BooleanState> {
        Some(self)
    }

    fn as_tile_vector_data(&self) -> Option<&dyn TileVectorData> {
        Some(self)
    }

    fn as_tiles_changed_listener(&self) -> Option<&dyn TilesChangedListener> {
        Some(self)
    }

    fn as_intersect_notify(&self) -> Option<&dyn IntersectNotify> {
        Some(self)
    }

    fn as_within_extents(&self) -> Option<&dyn WithinExtents> {
        Some(self)
    }

    fn as_elevation_listener(&self) -> Option<&dyn ElevationChangedListener> {
        Some(self)
    }

    fn as_traversable(&self) -> Option<&dyn Traverse> {
        Some(self)
    }
}

impl LayerExtents for Container {
    fn extents(&self) -> Extents {
        Container::extents(self)
    }
}

impl BuildScene for Container {
    fn build_scene(&self, _ctx: &FrameContext) -> Option<Node> {
        Some(self.scene_root())
    }
}

impl UpdateListener for Container {
    fn update_notify(&self, ctx: &FrameContext) {
        Container::update_notify(self, ctx);
    }
}

impl BooleanState for Container {
    fn get_boolean_state(&self) -> bool {
        self.boolean_state()
    }

    fn set_boolean_state(&self, state: bool) {
        self.broadcast_boolean_state(state);
    }
}

impl TileVectorData for Container {
    fn launch_vector_jobs(
        &self,
        extents: Extents,
        level: u32,
        scheduler: &dyn JobScheduler,
        ctx: &FrameContext,
    ) -> Vec<JobHandle> {
        Container::launch_vector_jobs(self, extents, level, scheduler, ctx)
    }
}

impl TilesChangedListener for Container {
    fn tile_add_notify(&self, child: PageKey, parent: Option<PageKey>) {
        Container::tile_add_notify(self, child, parent);
    }

    fn tile_removed_notify(&self, child: PageKey, parent: Option<PageKey>) {
        Container::tile_removed_notify(self, child, parent);
    }
}

impl IntersectNotify for Container {
    fn intersect_notify(&self, query: &IntersectQuery, ctx: &FrameContext, closest: &mut ClosestHit) {
        Container::intersect_notify(self, query, ctx, closest);
    }
}

impl WithinExtents for Container {
    fn items_within_extents(&self, extents: Extents, ctx: &FrameContext) -> Option<LayerRef> {
        Container::items_within_extents(self, extents, ctx).map(|c| c as LayerRef)
    }
}

impl ElevationChangedListener for Container {
    fn elevation_changed_notify(
        &self,
        extents: Extents,
        level: u32,
        patch: &ElevationPatch,
        ctx: &FrameContext,
    ) -> bool {
        Container::elevation_changed_notify(self, extents, level, patch, ctx)
    }
}

impl Traverse for Container {
    fn traverse(&self, visitor: &mut dyn LayerVisitor) {
        Container::traverse(self, visitor);
    }
}
