//! Bounding-box index over watershed polygons and downstream resolution.

use basin_common::{BoundingBox, Coordinate};
use geo::{Contains, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::watershed::WatershedCollection;

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// R-tree of watershed bounding boxes keyed by collection position.
///
/// Built once per run and read-only afterwards, so it can be shared by
/// reference across worker threads.
pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
    len: usize,
}

impl SpatialIndex {
    pub fn build(collection: &WatershedCollection) -> Self {
        let entries: Vec<IndexedBox> = collection
            .iter()
            .map(|watershed| {
                let b = &watershed.bbox;
                GeomWithData::new(
                    Rectangle::from_corners([b.min_x, b.min_y], [b.max_x, b.max_y]),
                    watershed.position,
                )
            })
            .collect();
        let len = entries.len();

        tracing::debug!(entries = len, "Built watershed bounding-box index");

        Self {
            tree: RTree::bulk_load(entries),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positions whose bounding box intersects `extent`, ascending.
    ///
    /// Boxes that only touch `extent` on an edge or corner are included.
    pub fn candidates(&self, extent: &BoundingBox) -> Vec<usize> {
        let envelope = AABB::from_corners(
            [extent.min_x, extent.min_y],
            [extent.max_x, extent.max_y],
        );
        let mut positions: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        positions.sort_unstable();
        positions
    }
}

/// First candidate (in the given order) whose polygon strictly contains `probe`.
///
/// A probe on a polygon boundary matches nothing. `skip` is left out of the
/// test, which is how a watershed is kept from draining into itself.
pub fn resolve(
    probe: Coordinate,
    candidates: &[usize],
    collection: &WatershedCollection,
    skip: Option<usize>,
) -> Option<usize> {
    let point = Point::new(probe.x, probe.y);
    candidates
        .iter()
        .copied()
        .filter(|&position| Some(position) != skip)
        .find(|&position| {
            collection
                .get(position)
                .map(|watershed| watershed.geometry.contains(&point))
                .unwrap_or(false)
        })
}

/// Test every watershed in position order. Used when the indexed search misses.
pub fn scan_all(
    probe: Coordinate,
    collection: &WatershedCollection,
    skip: Option<usize>,
) -> Option<usize> {
    let all: Vec<usize> = (0..collection.len()).collect();
    resolve(probe, &all, collection, skip)
}
