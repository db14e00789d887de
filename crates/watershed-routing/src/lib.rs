//! Watershed Drainage Routing
//!
//! Given a set of watershed polygons, a flow-accumulation raster and a D8
//! flow-direction raster on the same grid, this crate works out which
//! watershed each one drains into:
//!
//! - **Outlet**: the cell of maximum accumulation inside the polygon
//! - **Probe**: one cell downstream of the outlet, following the D8 code
//! - **Downstream**: the watershed whose interior contains the probe, or
//!   `-1` when the probe leaves the study area
//!
//! # Architecture
//!
//! ```text
//! WatershedCollection (GeoJSON)
//!      │
//!      ▼
//! WatershedRouter::route(collection)
//!      │
//!      ├─► SpatialIndex::build (R-tree of bounding boxes, once)
//!      │
//!      ├─► per watershed (sequential or rayon pool):
//!      │         │
//!      │         ├─► RasterSampler: accumulation clipped to polygon
//!      │         ├─► locate_outlet: max cell, first in row-major order
//!      │         ├─► RasterSampler: direction code at the outlet
//!      │         ├─► FlowDirectionTable::project: probe point
//!      │         └─► SpatialIndex::candidates + resolve: strict containment
//!      │
//!      └─► RoutingResult { outcomes, summary }
//!               │
//!               ▼
//!          WatershedCollection::apply_outcomes → GeoJSON with `dsid`
//! ```
//!
//! # Example
//!
//! ```ignore
//! use watershed_routing::{GeoTiffSource, RoutingConfig, WatershedCollection, WatershedRouter};
//!
//! let accumulation = GeoTiffSource::new("facc.tif");
//! let direction = GeoTiffSource::new("fdir.tif");
//! let mut watersheds = WatershedCollection::from_geojson_file("basins.geojson", "wsid")?;
//!
//! let router = WatershedRouter::new(&accumulation, &direction, RoutingConfig::default())?;
//! router.preflight(&watersheds)?;
//! let summary = router.route_collection(&mut watersheds)?;
//! watersheds.write_geojson("routed.geojson", "dsid")?;
//! ```

pub mod config;
pub mod direction;
pub mod error;
pub mod outlet;
pub mod raster;
pub mod router;
pub mod spatial;
pub mod watershed;

// Re-export commonly used types at crate root
pub use config::{ErrorPolicy, RoutingConfig, SearchExtent};
pub use direction::{DirectionConvention, FlowDirectionTable};
pub use error::{Result, RouteError, RouteStage, RoutingError};
pub use outlet::{locate_outlet, Outlet};
pub use raster::{
    ClipGeometry, GeoTiffSource, InMemoryRaster, PixelWindow, RasterHeader, RasterReader,
    RasterSampler, RasterSource, RasterWindow,
};
pub use router::{
    PreflightReport, RouteOutcome, RoutingResult, RoutingSummary, WatershedRouter,
};
pub use spatial::{resolve, scan_all, SpatialIndex};
pub use watershed::{Watershed, WatershedCollection, ROUTE_ERROR_FIELD};

pub use basin_common::{BoundingBox, Coordinate, Crs, GeoTransform, PixelSize};
