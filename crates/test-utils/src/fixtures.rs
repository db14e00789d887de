//! Common test fixtures for watershed routing tests.

use crate::generators::{BasinSpec, SyntheticBasins};

/// D8 codes used by the fixtures (ESRI encoding).
pub mod esri {
    pub const EAST: f64 = 1.0;
    pub const SOUTH_EAST: f64 = 2.0;
    pub const SOUTH: f64 = 4.0;
    pub const SOUTH_WEST: f64 = 8.0;
    pub const WEST: f64 = 16.0;
    pub const NORTH_WEST: f64 = 32.0;
    pub const NORTH: f64 = 64.0;
    pub const NORTH_EAST: f64 = 128.0;
    /// Flat / undefined cell.
    pub const FLAT: f64 = 0.0;
}

/// CRS names as they appear in GeoJSON `crs` members.
pub mod crs {
    pub const UTM_13N_URN: &str = "urn:ogc:def:crs:EPSG::26913";
    pub const EPSG_26913: u16 = 26913;
    pub const EPSG_4326: u16 = 4326;
}

/// Three 4x4-cell squares A(1), B(2), C(3) side by side, 10 m cells.
///
/// Every outlet is on the east edge and points east, so A drains into B,
/// B into C and C out of the grid: expected `dsid` 2, 3, -1.
pub fn three_square_chain() -> SyntheticBasins {
    SyntheticBasins::row_of_squares(&[1, 2, 3], 4, 10.0, &[esri::EAST, esri::EAST, esri::EAST])
}

/// Same chain as [`three_square_chain`] but the middle outlet is flat.
pub fn chain_with_flat_outlet() -> SyntheticBasins {
    SyntheticBasins::row_of_squares(&[1, 2, 3], 4, 10.0, &[esri::EAST, esri::FLAT, esri::EAST])
}

/// A 3x3-cell basin whose outlet is its centre cell pointing at its own
/// interior, next to a second basin on the east.
pub fn self_draining_basin() -> SyntheticBasins {
    SyntheticBasins::new(6, 3, 1.0, 0.0, 3.0)
        .with_basin(BasinSpec {
            wsid: 10,
            col_off: 0,
            row_off: 0,
            size: 3,
            outlet: (1, 1),
            outlet_code: esri::WEST,
        })
        .with_basin(BasinSpec {
            wsid: 20,
            col_off: 3,
            row_off: 0,
            size: 3,
            outlet: (2, 1),
            outlet_code: esri::EAST,
        })
}

/// A 2x2 grid of 3x3-cell basins draining into each other in a ring.
///
/// ```text
/// 1 → 2
/// ↑   ↓
/// 4 ← 3
/// ```
///
/// The outlets point east, south, west and north, so every axis direction is
/// exercised. Expected `dsid`: 1→2, 2→3, 3→4, 4→1.
pub fn square_ring() -> SyntheticBasins {
    SyntheticBasins::new(6, 6, 1.0, 0.0, 6.0)
        .with_basin(BasinSpec {
            wsid: 1,
            col_off: 0,
            row_off: 0,
            size: 3,
            outlet: (2, 1),
            outlet_code: esri::EAST,
        })
        .with_basin(BasinSpec {
            wsid: 2,
            col_off: 3,
            row_off: 0,
            size: 3,
            outlet: (1, 2),
            outlet_code: esri::SOUTH,
        })
        .with_basin(BasinSpec {
            wsid: 3,
            col_off: 3,
            row_off: 3,
            size: 3,
            outlet: (0, 1),
            outlet_code: esri::WEST,
        })
        .with_basin(BasinSpec {
            wsid: 4,
            col_off: 0,
            row_off: 3,
            size: 3,
            outlet: (1, 0),
            outlet_code: esri::NORTH,
        })
}
