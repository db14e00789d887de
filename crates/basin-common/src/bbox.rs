//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::Coordinate;

/// An axis-aligned bounding box in the coordinate units of the data's CRS.
///
/// Boxes are closed: a box that only touches another along an edge or a
/// corner still intersects it. Adjacent watersheds share boundaries, so the
/// routing candidate search relies on touching boxes being reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Degenerate box covering a single point.
    pub fn from_point(point: Coordinate) -> Self {
        Self::new(point.x, point.y, point.x, point.y)
    }

    /// Check if this bbox intersects or touches another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow the box so that it also covers `point`.
    pub fn include_point(&self, point: Coordinate) -> BoundingBox {
        self.union(&BoundingBox::from_point(point))
    }

    /// Check if a point is contained within this bbox (edges included).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_include_point() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let grown = bbox.include_point(Coordinate::new(12.5, -1.0));
        assert_eq!(grown, BoundingBox::new(0.0, -1.0, 12.5, 10.0));

        // A point already inside leaves the box unchanged
        assert_eq!(bbox.include_point(Coordinate::new(5.0, 5.0)), bbox);
    }
}
