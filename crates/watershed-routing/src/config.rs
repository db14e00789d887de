//! Configuration for the watershed router.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::direction::{DirectionConvention, FlowDirectionTable};
use crate::error::{Result, RoutingError};

/// Configuration for the watershed router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Built-in D8 encoding of the direction raster.
    pub direction_convention: DirectionConvention,

    /// Custom code → (dx, dy) table; overrides `direction_convention`.
    pub direction_table: Option<FlowDirectionTable>,

    /// Extent used to query downstream candidates.
    pub search_extent: SearchExtent,

    /// Scan every watershed when the indexed search finds no candidates.
    pub full_scan_fallback: bool,

    /// Never report a watershed as its own downstream.
    pub exclude_self: bool,

    /// Keep every cell touching a watershed when clipping accumulation.
    pub all_touched: bool,

    /// What to do when one watershed cannot be routed.
    pub error_policy: ErrorPolicy,

    /// Route watersheds on a thread pool.
    pub parallel: bool,

    /// Worker threads for parallel routing (rayon default when unset).
    pub threads: Option<usize>,

    /// Log progress every N watersheds.
    pub progress_interval: usize,

    /// Attribute holding the watershed id.
    pub id_field: String,

    /// Attribute written with the downstream id.
    pub downstream_field: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            direction_convention: DirectionConvention::Esri,
            direction_table: None,
            search_extent: SearchExtent::WatershedAndProbe,
            full_scan_fallback: true,
            exclude_self: true,
            all_touched: false,
            error_policy: ErrorPolicy::Record,
            parallel: false,
            threads: None,
            progress_interval: 100,
            id_field: "wsid".to_string(),
            downstream_field: "dsid".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `ROUTING_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(convention) = env_parse("ROUTING_DIRECTION_CONVENTION") {
            self.use_convention(convention);
        }

        if let Some(extent) = env_parse("ROUTING_SEARCH_EXTENT") {
            self.search_extent = extent;
        }

        if let Some(val) = env_bool("ROUTING_FULL_SCAN_FALLBACK") {
            self.full_scan_fallback = val;
        }

        if let Some(val) = env_bool("ROUTING_EXCLUDE_SELF") {
            self.exclude_self = val;
        }

        if let Some(val) = env_bool("ROUTING_ALL_TOUCHED") {
            self.all_touched = val;
        }

        if let Some(policy) = env_parse("ROUTING_ERROR_POLICY") {
            self.error_policy = policy;
        }

        if let Some(val) = env_bool("ROUTING_PARALLEL") {
            self.parallel = val;
        }

        if let Some(threads) = env_parse("ROUTING_THREADS") {
            self.threads = Some(threads);
        }

        if let Some(interval) = env_parse("ROUTING_PROGRESS_INTERVAL") {
            self.progress_interval = interval;
        }

        if let Ok(val) = std::env::var("ROUTING_ID_FIELD") {
            self.id_field = val;
        }

        if let Ok(val) = std::env::var("ROUTING_DOWNSTREAM_FIELD") {
            self.downstream_field = val;
        }

        self
    }

    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RoutingError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id_field.trim().is_empty() {
            return Err(RoutingError::config("id_field must not be empty"));
        }

        if self.downstream_field.trim().is_empty() {
            return Err(RoutingError::config("downstream_field must not be empty"));
        }

        if self.id_field == self.downstream_field {
            return Err(RoutingError::config(format!(
                "id_field and downstream_field are both '{}'",
                self.id_field
            )));
        }

        if self.threads == Some(0) {
            return Err(RoutingError::config("threads must be > 0"));
        }

        if self.progress_interval == 0 {
            return Err(RoutingError::config("progress_interval must be > 0"));
        }

        if let Some(table) = &self.direction_table {
            table.validate()?;
        }

        Ok(())
    }

    /// Switch to a built-in convention, dropping any custom table.
    pub fn use_convention(&mut self, convention: DirectionConvention) {
        if self.direction_table.take().is_some() {
            tracing::warn!(
                convention = %convention,
                "Custom direction table replaced by built-in convention"
            );
        }
        self.direction_convention = convention;
    }

    /// The direction table in effect: the custom one, else the convention's.
    pub fn direction_table(&self) -> FlowDirectionTable {
        self.direction_table
            .clone()
            .unwrap_or_else(|| self.direction_convention.table())
    }
}

fn env_parse<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let val = std::env::var(key).ok()?;
    match val.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key, value = %val, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Bounding box used to look up downstream candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchExtent {
    /// The routed watershed's own bounding box.
    WatershedBounds,
    /// The own bounding box grown to include the probe point.
    #[default]
    WatershedAndProbe,
}

impl SearchExtent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WatershedBounds => "watershed_bounds",
            Self::WatershedAndProbe => "watershed_and_probe",
        }
    }
}

impl FromStr for SearchExtent {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "watershed_bounds" | "bounds" => Ok(Self::WatershedBounds),
            "watershed_and_probe" | "probe" => Ok(Self::WatershedAndProbe),
            other => Err(RoutingError::config(format!(
                "unknown search extent '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SearchExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How per-watershed failures affect the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure on the watershed and keep going.
    #[default]
    Record,
    /// Stop at the first failing watershed.
    Abort,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Abort => "abort",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "abort" | "fail_fast" => Ok(Self::Abort),
            other => Err(RoutingError::config(format!(
                "unknown error policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoutingConfig::default();
        assert_eq!(config.direction_convention, DirectionConvention::Esri);
        assert_eq!(config.search_extent, SearchExtent::WatershedAndProbe);
        assert_eq!(config.error_policy, ErrorPolicy::Record);
        assert!(config.exclude_self);
        assert!(config.full_scan_fallback);
        assert!(!config.parallel);
        assert_eq!(config.id_field, "wsid");
        assert_eq!(config.downstream_field, "dsid");
        assert!(config.validate().is_ok());
        assert_eq!(config.direction_table(), FlowDirectionTable::esri());
    }

    #[test]
    fn test_validate() {
        let mut config = RoutingConfig::default();
        config.threads = Some(0);
        assert!(config.validate().is_err());

        let mut config = RoutingConfig::default();
        config.progress_interval = 0;
        assert!(config.validate().is_err());

        let mut config = RoutingConfig::default();
        config.downstream_field = "wsid".to_string();
        assert!(config.validate().is_err());

        let mut config = RoutingConfig::default();
        config.id_field = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial() {
        let config = RoutingConfig::from_yaml_str(
            "direction_convention: whitebox\nerror_policy: abort\nthreads: 4\n",
        )
        .unwrap();
        assert_eq!(config.direction_convention, DirectionConvention::Whitebox);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.threads, Some(4));
        assert_eq!(config.progress_interval, 100);
        assert_eq!(config.direction_table(), FlowDirectionTable::whitebox());
    }

    #[test]
    fn test_yaml_custom_table_overrides_convention() {
        let yaml = "\
direction_convention: esri
direction_table:
  1: [0, 1]
  2: [0, -1]
";
        let config = RoutingConfig::from_yaml_str(yaml).unwrap();
        let table = config.direction_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.offset(1.0).unwrap(), (0, 1));
        assert!(table.offset(4.0).is_err());
    }

    #[test]
    fn test_yaml_invalid_table_rejected() {
        let yaml = "direction_table:\n  1: [0, 0]\n";
        assert!(RoutingConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_use_convention_drops_custom_table() {
        let mut config =
            RoutingConfig::from_yaml_str("direction_table:\n  1: [0, 1]\n  2: [0, -1]\n").unwrap();
        config.use_convention(DirectionConvention::Taudem);
        assert!(config.direction_table.is_none());
        assert_eq!(config.direction_table(), FlowDirectionTable::taudem());
    }

    #[test]
    fn test_env_convention_overrides_yaml_table() {
        let config =
            RoutingConfig::from_yaml_str("direction_table:\n  1: [0, 1]\n  2: [0, -1]\n").unwrap();
        std::env::set_var("ROUTING_DIRECTION_CONVENTION", "whitebox");
        let config = config.with_env_overrides();
        std::env::remove_var("ROUTING_DIRECTION_CONVENTION");

        assert_eq!(config.direction_convention, DirectionConvention::Whitebox);
        assert_eq!(config.direction_table(), FlowDirectionTable::whitebox());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(
            "watershed_bounds".parse::<SearchExtent>().unwrap(),
            SearchExtent::WatershedBounds
        );
        assert_eq!("ABORT".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Abort);
        assert!("sometimes".parse::<ErrorPolicy>().is_err());
        assert_eq!(SearchExtent::WatershedAndProbe.to_string(), "watershed_and_probe");
    }
}
