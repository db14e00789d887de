//! Error types for watershed routing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the routing components.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// The raster could not be opened or read, or the requested geometry
    /// has no usable cells in it.
    #[error("raster access failed for {raster}: {reason}")]
    RasterAccess { raster: String, reason: String },

    /// The flow direction cell at the outlet holds a value outside the
    /// direction table (flat, sink or nodata).
    #[error("unknown flow direction code {value}")]
    UnknownDirectionCode { value: f64 },

    /// A watershed feature in the input collection is unusable.
    #[error("invalid watershed feature {index}: {reason}")]
    InvalidWatershed { index: usize, reason: String },

    /// Vector input/output error.
    #[error("vector data error: {0}")]
    Vector(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl RoutingError {
    /// Create a RasterAccess error.
    pub fn raster_access(raster: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RasterAccess {
            raster: raster.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidWatershed error.
    pub fn invalid_watershed(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidWatershed {
            index,
            reason: reason.into(),
        }
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short machine-readable tag, written next to failed watersheds.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RasterAccess { .. } => "raster_access",
            Self::UnknownDirectionCode { .. } => "unknown_direction_code",
            Self::InvalidWatershed { .. } => "invalid_watershed",
            Self::Vector(_) => "vector",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for RoutingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RoutingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Vector(err.to_string())
    }
}

impl From<geojson::Error> for RoutingError {
    fn from(err: geojson::Error) -> Self {
        Self::Vector(err.to_string())
    }
}

impl From<serde_yaml::Error> for RoutingError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Step of the per-watershed pipeline at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStage {
    SampleAccumulation,
    LocateOutlet,
    SampleDirection,
    ProjectProbe,
    ResolveDownstream,
}

impl RouteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SampleAccumulation => "sample_accumulation",
            Self::LocateOutlet => "locate_outlet",
            Self::SampleDirection => "sample_direction",
            Self::ProjectProbe => "project_probe",
            Self::ResolveDownstream => "resolve_downstream",
        }
    }
}

impl fmt::Display for RouteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing failure for one watershed, with the context needed to find it.
#[derive(Error, Debug)]
#[error("watershed {wsid} (row {position}) failed at {stage}: {error}")]
pub struct RouteError {
    pub wsid: i64,
    pub position: usize,
    pub stage: RouteStage,
    #[source]
    pub error: RoutingError,
}

impl RouteError {
    pub fn new(wsid: i64, position: usize, stage: RouteStage, error: RoutingError) -> Self {
        Self {
            wsid,
            position,
            stage,
            error,
        }
    }
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;
