//! Geographic extents.
//!
//! Provides the axis-aligned bounding box over geographic coordinates that
//! layers report and containers fold together. A default-constructed
//! extents is the *null* sentinel `(0,0)-(0,0)`: `expand` treats it as
//! uninitialized and replaces it outright rather than unioning, so folding
//! over an arbitrary set of child extents needs no special first-element
//! handling.
//!
//! `Extents` is a plain `Copy` value type. Copies are independent, which
//! makes concurrent use trivial; shared extents live under their owner's
//! lock.

use std::fmt;

/// A 2D geographic point (longitude, latitude in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl Point2 {
    /// Create a point from longitude and latitude.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl fmt::Display for Point2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lon, self.lat)
    }
}

/// Axis-aligned geographic bounding box.
///
/// The default value is the null sentinel: both corners at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extents {
    min: Point2,
    max: Point2,
}

impl Extents {
    /// Create extents from corner coordinates.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min: Point2::new(min_lon, min_lat),
            max: Point2::new(max_lon, max_lat),
        }
    }

    /// The null sentinel: `min == max == (0,0)`.
    pub fn null() -> Self {
        Self::default()
    }

    /// True if this is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.min == Point2::default() && self.max == Point2::default()
    }

    /// Minimum longitude.
    pub fn min_lon(&self) -> f64 {
        self.min.lon
    }

    /// Minimum latitude.
    pub fn min_lat(&self) -> f64 {
        self.min.lat
    }

    /// Maximum longitude.
    pub fn max_lon(&self) -> f64 {
        self.max.lon
    }

    /// Maximum latitude.
    pub fn max_lat(&self) -> f64 {
        self.max.lat
    }

    /// Grow these extents to include `other`.
    ///
    /// If this extents is the null sentinel it is replaced by `other`
    /// verbatim; otherwise the corners become the componentwise min/max of
    /// the two boxes. Always succeeds.
    pub fn expand(&mut self, other: Extents) {
        if self.is_null() {
            *self = other;
            return;
        }
        self.min.lon = self.min.lon.min(other.min.lon);
        self.min.lat = self.min.lat.min(other.min.lat);
        self.max.lon = self.max.lon.max(other.max.lon);
        self.max.lat = self.max.lat.max(other.max.lat);
    }

    /// True iff the two boxes overlap on both axes (closed intervals; ties
    /// count as intersecting).
    pub fn intersects(&self, other: &Extents) -> bool {
        self.min.lon.max(other.min.lon) <= self.max.lon.min(other.max.lon)
            && self.min.lat.max(other.min.lat) <= self.max.lat.min(other.max.lat)
    }

    /// Standard point-in-box test (closed intervals).
    ///
    /// Used for centroid-based membership when a child has no finer
    /// containment predicate.
    pub fn contains(&self, point: Point2) -> bool {
        point.lon >= self.min.lon
            && point.lon <= self.max.lon
            && point.lat >= self.min.lat
            && point.lat <= self.max.lat
    }

    /// The centroid of the box.
    pub fn center(&self) -> Point2 {
        Point2::new(
            (self.min.lon + self.max.lon) / 2.0,
            (self.min.lat + self.max.lat) / 2.0,
        )
    }
}

impl fmt::Display for Extents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_is_null_sentinel() {
        let e = Extents::default();
        assert!(e.is_null());
        assert_eq!(e, Extents::null());
    }

    #[test]
    fn test_expand_replaces_null() {
        let mut e = Extents::null();
        let other = Extents::new(-10.0, -5.0, 10.0, 5.0);
        e.expand(other);
        assert_eq!(e, other);
    }

    #[test]
    fn test_expand_unions_non_null() {
        let mut e = Extents::new(0.0, 0.0, 10.0, 10.0);
        e.expand(Extents::new(20.0, 20.0, 30.0, 30.0));
        assert_eq!(e, Extents::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_expand_idempotent_on_non_null() {
        let mut e = Extents::new(-74.0, 40.0, -73.0, 41.0);
        let before = e;
        e.expand(before);
        assert_eq!(e, before);
    }

    #[test]
    fn test_intersects_overlap_and_disjoint() {
        let a = Extents::new(0.0, 0.0, 10.0, 10.0);
        let b = Extents::new(5.0, 5.0, 15.0, 15.0);
        let c = Extents::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_intersects_touching_edges_count() {
        // Ties count as intersecting (closed intervals).
        let a = Extents::new(0.0, 0.0, 10.0, 10.0);
        let b = Extents::new(10.0, 10.0, 20.0, 20.0);
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_contains_boundary_points() {
        let e = Extents::new(0.0, 0.0, 10.0, 10.0);
        assert!(e.contains(Point2::new(0.0, 0.0)));
        assert!(e.contains(Point2::new(10.0, 10.0)));
        assert!(e.contains(Point2::new(5.0, 5.0)));
        assert!(!e.contains(Point2::new(10.1, 5.0)));
        assert!(!e.contains(Point2::new(5.0, -0.1)));
    }

    #[test]
    fn test_center() {
        let e = Extents::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(e.center(), Point2::new(5.0, 5.0));
    }

    fn arb_extents() -> impl Strategy<Value = Extents> {
        (
            -180.0f64..180.0,
            -90.0f64..90.0,
            0.0f64..10.0,
            0.0f64..10.0,
        )
            .prop_map(|(lon, lat, w, h)| Extents::new(lon, lat, lon + w, lat + h))
    }

    proptest! {
        /// Property: intersects is symmetric.
        #[test]
        fn prop_intersects_symmetric(a in arb_extents(), b in arb_extents()) {
            prop_assert_eq!(a.intersects(&b), b.intersects(&a));
        }

        /// Property: expanding a non-null extents with itself changes nothing.
        #[test]
        fn prop_expand_self_idempotent(a in arb_extents()) {
            let mut e = a;
            e.expand(a);
            prop_assert_eq!(e, a);
        }

        /// Property: the union contains both inputs' centroids.
        #[test]
        fn prop_expand_contains_inputs(a in arb_extents(), b in arb_extents()) {
            let mut union = a;
            union.expand(b);
            prop_assert!(union.contains(a.center()));
            prop_assert!(union.contains(b.center()));
        }

        /// Property: every box intersects itself and contains its centroid.
        #[test]
        fn prop_self_intersection(a in arb_extents()) {
            prop_assert!(a.intersects(&a));
            prop_assert!(a.contains(a.center()));
        }
    }
}
