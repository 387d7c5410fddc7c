//! Intersection query types.
//!
//! A nearest-feature query fans out from the root container to every child
//! exposing the capability; each level keeps the globally closest hit and
//! builds the root-to-leaf path for it bottom-up.

use std::fmt;

use crate::scene::PageKey;

use super::LayerRef;

/// A 3D point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Create a point.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Root-to-leaf chain of layer handles leading to a hit.
pub type HitPath = Vec<LayerRef>;

/// Parameters of a nearest-feature intersection query.
#[derive(Clone)]
pub struct IntersectQuery {
    /// World-space intersection point.
    pub point: Point3,
    /// Longitude of the intersection, degrees.
    pub lon: f64,
    /// Latitude of the intersection, degrees.
    pub lat: f64,
    /// Elevation of the intersection, meters.
    pub elevation: f64,
    /// The paged tile the intersection occurred on, when known.
    pub tile: Option<PageKey>,
    /// The planetary body being intersected, when known.
    pub body: Option<LayerRef>,
}

impl IntersectQuery {
    /// Create a query with no tile or body context.
    pub fn new(point: Point3, lon: f64, lat: f64, elevation: f64) -> Self {
        Self {
            point,
            lon,
            lat,
            elevation,
            tile: None,
            body: None,
        }
    }
}

/// Accumulator for the globally closest hit.
///
/// Starts with an infinite distance and an empty path; a hit has been
/// registered once the distance is finite and the path non-empty.
#[derive(Clone)]
pub struct ClosestHit {
    /// Root-to-leaf path for the closest feature so far.
    pub path: HitPath,
    /// Location of the closest feature so far.
    pub point: Point3,
    /// Distance to the closest feature so far.
    pub distance: f64,
}

impl ClosestHit {
    /// A fresh accumulator with no hit.
    pub fn none() -> Self {
        Self {
            path: Vec::new(),
            point: Point3::default(),
            distance: f64::INFINITY,
        }
    }

    /// True once some layer has registered a hit.
    pub fn is_hit(&self) -> bool {
        self.distance.is_finite() && !self.path.is_empty()
    }
}

impl Default for ClosestHit {
    fn default() -> Self {
        Self::none()
    }
}
