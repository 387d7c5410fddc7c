//! Persisted container layouts.
//!
//! A [`ContainerLayout`] is a serializable snapshot of a container tree:
//! names, visibility, stable ids and per-layer parameters, but no loaded
//! data. Capturing a layout walks the children; restoring one rebuilds the
//! tree through a caller-supplied [`LayerFactory`], re-registering every
//! child without firing data-changed notifications.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::layer::{Layer, LayerId, LayerRef};

use super::Container;

/// Marker kind for nested containers inside a layout.
pub const CONTAINER_KIND: &str = "container";

/// Serializable description of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Layer kind, matched by the factory on restore. Nested containers
    /// use [`CONTAINER_KIND`] and are rebuilt by the engine itself.
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Stable identifier, if the layer has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Visibility at capture time.
    #[serde(default = "default_shown")]
    pub shown: bool,
    /// Free-form layer parameters (source URLs, styling, level ranges).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Child descriptors, for nested containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LayerDescriptor>,
}

fn default_shown() -> bool {
    true
}

impl LayerDescriptor {
    /// A descriptor with the given kind and name and nothing else.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            id: None,
            shown: true,
            params: BTreeMap::new(),
            children: Vec::new(),
        }
    }
}

/// Serializable snapshot of a container tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLayout {
    /// Root container name.
    pub name: String,
    /// Root container visibility.
    #[serde(default = "default_shown")]
    pub shown: bool,
    /// Comments carried through from the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    /// Descriptors for persistable children, in order.
    #[serde(default)]
    pub layers: Vec<LayerDescriptor>,
}

/// Builds concrete layers from descriptors when a layout is restored.
pub trait LayerFactory {
    /// Create the layer described, or `None` if the kind is unknown.
    /// Unknown kinds are skipped with a warning, not treated as errors.
    fn create(&self, descriptor: &LayerDescriptor) -> Option<LayerRef>;
}

impl Container {
    /// Capture this container tree as a serializable layout.
    ///
    /// Children that report no descriptor are transient and omitted.
    pub fn layout(&self) -> ContainerLayout {
        ContainerLayout {
            name: self.container_name(),
            shown: self.is_shown(),
            comments: self.comments(),
            layers: self
                .children()
                .iter()
                .filter_map(|child| child.layout_descriptor())
                .collect(),
        }
    }

    /// Rebuild a container tree from a layout.
    ///
    /// Every restored child is added without firing data-changed
    /// notifications; a freshly restored tree has no listeners to tell,
    /// and bulk loads must not spam any that were attached early.
    pub fn restore(layout: &ContainerLayout, factory: &dyn LayerFactory) -> Arc<Container> {
        let container = Container::new(layout.name.clone());
        container.set_shown(layout.shown);
        for comment in &layout.comments {
            container.add_comment(comment.clone());
        }

        for descriptor in &layout.layers {
            if let Some(layer) = restore_descriptor(descriptor, factory) {
                container.add(layer, false);
            }
        }

        container
    }
}

fn restore_descriptor(
    descriptor: &LayerDescriptor,
    factory: &dyn LayerFactory,
) -> Option<LayerRef> {
    if descriptor.kind == CONTAINER_KIND {
        let nested = match &descriptor.id {
            Some(id) => Container::with_id(descriptor.name.clone(), LayerId::new(id.clone())),
            None => Container::new(descriptor.name.clone()),
        };
        nested.set_shown(descriptor.shown);
        for child in &descriptor.children {
            if let Some(layer) = restore_descriptor(child, factory) {
                nested.add(layer, false);
            }
        }
        return Some(nested as LayerRef);
    }

    let layer = factory.create(descriptor);
    if layer.is_none() {
        warn!(kind = %descriptor.kind, name = %descriptor.name, "unknown layer kind skipped");
    }
    layer
}

impl Container {
    pub(super) fn container_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor {
            kind: CONTAINER_KIND.to_string(),
            name: self.container_name(),
            id: self.layer_id().map(|id| id.as_str().to_string()),
            shown: self.is_shown(),
            params: BTreeMap::new(),
            children: self
                .children()
                .iter()
                .filter_map(|child| child.layout_descriptor())
                .collect(),
        }
    }
}
