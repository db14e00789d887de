//! D8 flow direction tables and downstream probe projection.
//!
//! A D8 raster stores, per cell, a code naming the one of eight neighbours
//! the cell drains into. The code → neighbour mapping depends on the tool that
//! produced the raster, so it is held in a [`FlowDirectionTable`] supplied by
//! configuration rather than baked into the router.
//!
//! Offsets are `(dx, dy)` in whole cells with `dy` positive toward
//! geographic north (up), not toward increasing row index.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use basin_common::{Coordinate, PixelSize};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};

/// Known direction encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionConvention {
    /// ESRI / ArcGIS powers of two, starting east and turning clockwise.
    #[default]
    Esri,
    /// WhiteboxTools pointer: powers of two, starting north-east and turning clockwise.
    Whitebox,
    /// TauDEM 1..=8, starting east and turning counter-clockwise.
    Taudem,
}

impl DirectionConvention {
    pub fn table(&self) -> FlowDirectionTable {
        match self {
            Self::Esri => FlowDirectionTable::esri(),
            Self::Whitebox => FlowDirectionTable::whitebox(),
            Self::Taudem => FlowDirectionTable::taudem(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esri => "esri",
            Self::Whitebox => "whitebox",
            Self::Taudem => "taudem",
        }
    }
}

impl FromStr for DirectionConvention {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "esri" | "arcgis" => Ok(Self::Esri),
            "whitebox" | "wbt" => Ok(Self::Whitebox),
            "taudem" => Ok(Self::Taudem),
            other => Err(RoutingError::config(format!(
                "unknown direction convention '{}' (expected esri, whitebox or taudem)",
                other
            ))),
        }
    }
}

impl fmt::Display for DirectionConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from direction code to `(dx, dy)` cell offset.
///
/// Serializes as a plain map, so a custom table can be written in YAML as
/// `{1: [1, 0], 2: [1, -1], ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowDirectionTable {
    offsets: BTreeMap<u32, (i32, i32)>,
}

impl FlowDirectionTable {
    /// Build a table from `(code, (dx, dy))` entries, validating it.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, (i32, i32))>) -> Result<Self> {
        let table = Self {
            offsets: entries.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// ESRI encoding. The most common one, and the default.
    pub fn esri() -> Self {
        Self::unchecked([
            (1, (1, 0)),
            (2, (1, -1)),
            (4, (0, -1)),
            (8, (-1, -1)),
            (16, (-1, 0)),
            (32, (-1, 1)),
            (64, (0, 1)),
            (128, (1, 1)),
        ])
    }

    /// WhiteboxTools D8 pointer encoding (non-ESRI style).
    pub fn whitebox() -> Self {
        Self::unchecked([
            (1, (1, 1)),
            (2, (1, 0)),
            (4, (1, -1)),
            (8, (0, -1)),
            (16, (-1, -1)),
            (32, (-1, 0)),
            (64, (-1, 1)),
            (128, (0, 1)),
        ])
    }

    /// TauDEM D8 encoding.
    pub fn taudem() -> Self {
        Self::unchecked([
            (1, (1, 0)),
            (2, (1, 1)),
            (3, (0, 1)),
            (4, (-1, 1)),
            (5, (-1, 0)),
            (6, (-1, -1)),
            (7, (0, -1)),
            (8, (1, -1)),
        ])
    }

    fn unchecked<const N: usize>(entries: [(u32, (i32, i32)); N]) -> Self {
        Self {
            offsets: entries.into_iter().collect(),
        }
    }

    /// Check the table describes single-cell moves with no duplicates.
    pub fn validate(&self) -> Result<()> {
        if self.offsets.is_empty() {
            return Err(RoutingError::config("direction table is empty"));
        }

        let mut seen = BTreeMap::new();
        for (&code, &(dx, dy)) in &self.offsets {
            if (dx, dy) == (0, 0) {
                return Err(RoutingError::config(format!(
                    "direction code {} maps to offset (0, 0)",
                    code
                )));
            }
            if dx.abs() > 1 || dy.abs() > 1 {
                return Err(RoutingError::config(format!(
                    "direction code {} maps to ({}, {}), which is not a neighbouring cell",
                    code, dx, dy
                )));
            }
            if let Some(other) = seen.insert((dx, dy), code) {
                return Err(RoutingError::config(format!(
                    "direction codes {} and {} both map to ({}, {})",
                    other, code, dx, dy
                )));
            }
        }

        Ok(())
    }

    /// Look up the cell offset for a sampled direction value.
    ///
    /// Raster cells are read as floats; anything that is not an exact,
    /// non-negative integer present in the table is rejected.
    pub fn offset(&self, value: f64) -> Result<(i32, i32)> {
        if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
            return Err(RoutingError::UnknownDirectionCode { value });
        }
        self.offsets
            .get(&(value as u32))
            .copied()
            .ok_or(RoutingError::UnknownDirectionCode { value })
    }

    /// Downstream probe: the centre of the neighbouring cell `value` points to.
    pub fn project(&self, outlet: Coordinate, value: f64, pixel: PixelSize) -> Result<Coordinate> {
        let (dx, dy) = self.offset(value)?;
        Ok(outlet.offset(dx as f64 * pixel.x, dy as f64 * pixel.y))
    }

    /// Inverse of [`project`](Self::project): step back against the direction.
    pub fn reverse(&self, probe: Coordinate, value: f64, pixel: PixelSize) -> Result<Coordinate> {
        let (dx, dy) = self.offset(value)?;
        Ok(probe.offset(-dx as f64 * pixel.x, -dy as f64 * pixel.y))
    }

    /// Codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl Default for FlowDirectionTable {
    fn default() -> Self {
        Self::esri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: PixelSize = PixelSize { x: 30.0, y: 30.0 };

    #[test]
    fn test_builtin_tables_are_valid() {
        for convention in [
            DirectionConvention::Esri,
            DirectionConvention::Whitebox,
            DirectionConvention::Taudem,
        ] {
            let table = convention.table();
            assert!(table.validate().is_ok(), "{} table invalid", convention);
            assert_eq!(table.len(), 8);
        }
    }

    #[test]
    fn test_esri_cardinal_directions() {
        let table = FlowDirectionTable::esri();
        let outlet = Coordinate::new(1000.0, 2000.0);

        // East
        assert_eq!(table.project(outlet, 1.0, PIXEL).unwrap(), Coordinate::new(1030.0, 2000.0));
        // South
        assert_eq!(table.project(outlet, 4.0, PIXEL).unwrap(), Coordinate::new(1000.0, 1970.0));
        // West
        assert_eq!(table.project(outlet, 16.0, PIXEL).unwrap(), Coordinate::new(970.0, 2000.0));
        // North
        assert_eq!(table.project(outlet, 64.0, PIXEL).unwrap(), Coordinate::new(1000.0, 2030.0));
    }

    #[test]
    fn test_project_then_reverse_returns_to_outlet() {
        let outlet = Coordinate::new(512345.5, 4123456.25);
        for convention in [
            DirectionConvention::Esri,
            DirectionConvention::Whitebox,
            DirectionConvention::Taudem,
        ] {
            let table = convention.table();
            for code in table.codes() {
                let probe = table.project(outlet, code as f64, PIXEL).unwrap();
                assert!(probe.distance_to(&outlet) > 0.0);
                let back = table.reverse(probe, code as f64, PIXEL).unwrap();
                assert!(
                    back.distance_to(&outlet) < 1e-6,
                    "{} code {} did not round trip",
                    convention,
                    code
                );
            }
        }
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        let table = FlowDirectionTable::esri();
        for value in [0.0, 3.0, 255.0, -1.0, 1.5, f64::NAN, f64::INFINITY] {
            let err = table.offset(value).unwrap_err();
            assert!(matches!(err, RoutingError::UnknownDirectionCode { .. }));
        }
    }

    #[test]
    fn test_invalid_custom_tables() {
        assert!(FlowDirectionTable::from_entries(Vec::<(u32, (i32, i32))>::new()).is_err());
        assert!(FlowDirectionTable::from_entries([(1, (0, 0))]).is_err());
        assert!(FlowDirectionTable::from_entries([(1, (2, 0))]).is_err());
        assert!(FlowDirectionTable::from_entries([(1, (1, 0)), (2, (1, 0))]).is_err());
        assert!(FlowDirectionTable::from_entries([(10, (1, 0)), (20, (-1, 0))]).is_ok());
    }

    #[test]
    fn test_table_from_yaml() {
        let yaml = "1: [1, 0]\n2: [0, -1]\n3: [-1, 0]\n4: [0, 1]\n";
        let table: FlowDirectionTable = serde_yaml::from_str(yaml).unwrap();
        assert!(table.validate().is_ok());
        assert_eq!(table.offset(2.0).unwrap(), (0, -1));
        assert_eq!(table.codes().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_convention_from_str() {
        assert_eq!("ESRI".parse::<DirectionConvention>().unwrap(), DirectionConvention::Esri);
        assert_eq!("wbt".parse::<DirectionConvention>().unwrap(), DirectionConvention::Whitebox);
        assert_eq!("taudem".parse::<DirectionConvention>().unwrap(), DirectionConvention::Taudem);
        assert!("grass".parse::<DirectionConvention>().is_err());
    }
}
