//! Coordinate Reference System identifiers.
//!
//! Routing never reprojects: the watershed polygons and both rasters are
//! expected to share one CRS. This type exists so that mismatches can be
//! detected and reported before a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A CRS identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    /// WGS84 geographic.
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }
}

/// Parses the identifiers found in GeoJSON `crs` members and on the command line.
///
/// Accepts formats like:
/// - "EPSG:32613" / "epsg:32613"
/// - "urn:ogc:def:crs:EPSG::32613" (also with a version, "EPSG:6.6:32613")
/// - "CRS:84" and "urn:ogc:def:crs:OGC:1.3:CRS84" (WGS84)
impl FromStr for Crs {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();

        if normalized == "CRS:84" || normalized.ends_with(":CRS84") {
            return Ok(Crs::wgs84());
        }

        let code = if let Some(rest) = normalized.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
            // "URN:OGC:DEF:CRS:EPSG::32613" or "URN:OGC:DEF:CRS:EPSG:6.6:32613"
            rest.rsplit(':').next().unwrap_or_default()
        } else if let Some(rest) = normalized.strip_prefix("EPSG:") {
            rest
        } else {
            return Err(CrsParseError::UnsupportedCrs(s.to_string()));
        };

        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| CrsParseError::InvalidCode(s.to_string()))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid EPSG code in CRS: {0}")]
    InvalidCode(String),
}
