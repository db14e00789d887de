//! Common types shared across the watershed routing crates.

pub mod bbox;
pub mod crs;
pub mod transform;

pub use bbox::BoundingBox;
pub use crs::{Crs, CrsParseError};
pub use transform::{Coordinate, GeoTransform, PixelSize};
