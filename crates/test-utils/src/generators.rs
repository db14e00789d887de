//! Synthetic basin generators.
//!
//! These build small accumulation/direction grids and matching watershed
//! polygons whose drainage is known in advance, so routing results can be
//! checked exactly.

use serde_json::{json, Value};

/// One square watershed inside a [`SyntheticBasins`] grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinSpec {
    pub wsid: i64,
    /// Top-left cell of the square.
    pub col_off: usize,
    pub row_off: usize,
    /// Side length in cells.
    pub size: usize,
    /// Outlet cell relative to the square's top-left cell.
    pub outlet: (usize, usize),
    /// Direction code written at the outlet.
    pub outlet_code: f64,
}

impl BasinSpec {
    /// Outlet cell in grid coordinates.
    pub fn outlet_cell(&self) -> (usize, usize) {
        (self.col_off + self.outlet.0, self.row_off + self.outlet.1)
    }

    fn contains_cell(&self, col: usize, row: usize) -> bool {
        col >= self.col_off
            && col < self.col_off + self.size
            && row >= self.row_off
            && row < self.row_off + self.size
    }
}

/// A north-up grid of square watersheds with accumulation peaking at each outlet.
///
/// Accumulation inside a basin is `1000 - manhattan distance to its outlet`,
/// so every basin has exactly one maximum. Cells outside every basin hold
/// `background_accumulation`.
#[derive(Debug, Clone)]
pub struct SyntheticBasins {
    pub width: usize,
    pub height: usize,
    pub cell_size: f64,
    /// World coordinate of the grid's top-left corner.
    pub origin_x: f64,
    pub origin_y: f64,
    pub basins: Vec<BasinSpec>,
    /// Direction code for every non-outlet cell.
    pub fill_code: f64,
    pub background_accumulation: f64,
}

impl SyntheticBasins {
    pub fn new(width: usize, height: usize, cell_size: f64, origin_x: f64, origin_y: f64) -> Self {
        Self {
            width,
            height,
            cell_size,
            origin_x,
            origin_y,
            basins: Vec::new(),
            fill_code: 1.0,
            background_accumulation: 0.0,
        }
    }

    /// `ids.len()` squares of `size` cells side by side along x.
    ///
    /// Each outlet sits in the middle of the square's east edge and carries the
    /// matching entry of `outlet_codes`.
    pub fn row_of_squares(ids: &[i64], size: usize, cell_size: f64, outlet_codes: &[f64]) -> Self {
        assert_eq!(ids.len(), outlet_codes.len(), "one outlet code per basin");
        let mut grid = Self::new(ids.len() * size, size, cell_size, 0.0, size as f64 * cell_size);
        for (i, (&wsid, &code)) in ids.iter().zip(outlet_codes).enumerate() {
            grid.basins.push(BasinSpec {
                wsid,
                col_off: i * size,
                row_off: 0,
                size,
                outlet: (size - 1, size / 2),
                outlet_code: code,
            });
        }
        grid
    }

    pub fn with_basin(mut self, basin: BasinSpec) -> Self {
        self.basins.push(basin);
        self
    }

    /// GDAL-order geotransform `[origin_x, cell, 0, origin_y, 0, -cell]`.
    pub fn transform(&self) -> [f64; 6] {
        [self.origin_x, self.cell_size, 0.0, self.origin_y, 0.0, -self.cell_size]
    }

    /// Centre of a grid cell in world coordinates.
    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// `(min_x, min_y, max_x, max_y)` of a basin square.
    pub fn basin_bounds(&self, basin: &BasinSpec) -> (f64, f64, f64, f64) {
        let min_x = self.origin_x + basin.col_off as f64 * self.cell_size;
        let max_y = self.origin_y - basin.row_off as f64 * self.cell_size;
        let side = basin.size as f64 * self.cell_size;
        (min_x, max_y - side, min_x + side, max_y)
    }

    /// Accumulation values, row-major, top row first.
    pub fn accumulation(&self) -> Vec<f64> {
        let mut data = vec![self.background_accumulation; self.width * self.height];
        for basin in &self.basins {
            let (oc, or) = basin.outlet_cell();
            for row in basin.row_off..(basin.row_off + basin.size).min(self.height) {
                for col in basin.col_off..(basin.col_off + basin.size).min(self.width) {
                    let distance = col.abs_diff(oc) + row.abs_diff(or);
                    data[row * self.width + col] = 1000.0 - distance as f64;
                }
            }
        }
        data
    }

    /// Direction codes: `fill_code` everywhere except each basin's outlet.
    pub fn direction(&self) -> Vec<f64> {
        let mut data = vec![self.fill_code; self.width * self.height];
        for basin in &self.basins {
            let (col, row) = basin.outlet_cell();
            if col < self.width && row < self.height {
                data[row * self.width + col] = basin.outlet_code;
            }
        }
        data
    }

    /// Which basin (by index) a cell belongs to, if any.
    pub fn basin_at(&self, col: usize, row: usize) -> Option<usize> {
        self.basins.iter().position(|b| b.contains_cell(col, row))
    }

    /// GeoJSON FeatureCollection of the basin squares with a `wsid` property.
    ///
    /// `crs` is written as a legacy `crs` member when given.
    pub fn geojson(&self, crs: Option<&str>) -> String {
        let features: Vec<Value> = self
            .basins
            .iter()
            .map(|basin| square_feature(basin.wsid, self.basin_bounds(basin)))
            .collect();
        feature_collection(features, crs).to_string()
    }
}

/// A `Polygon` feature for an axis-aligned rectangle.
pub fn square_feature(wsid: i64, bounds: (f64, f64, f64, f64)) -> Value {
    let (min_x, min_y, max_x, max_y) = bounds;
    json!({
        "type": "Feature",
        "properties": { "wsid": wsid },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [min_x, min_y],
                [max_x, min_y],
                [max_x, max_y],
                [min_x, max_y],
                [min_x, min_y],
            ]],
        },
    })
}

/// Wrap features in a FeatureCollection, optionally with a named `crs` member.
pub fn feature_collection(features: Vec<Value>, crs: Option<&str>) -> Value {
    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if let Some(name) = crs {
        collection["crs"] = json!({ "type": "name", "properties": { "name": name } });
    }
    collection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_of_squares_layout() {
        let grid = SyntheticBasins::row_of_squares(&[1, 2, 3], 4, 10.0, &[1.0, 1.0, 1.0]);
        assert_eq!(grid.width, 12);
        assert_eq!(grid.height, 4);
        assert_eq!(grid.basins[1].outlet_cell(), (7, 2));
        assert_eq!(grid.basin_bounds(&grid.basins[1]), (40.0, 0.0, 80.0, 40.0));
        assert_eq!(grid.basin_at(8, 0), Some(2));
    }

    #[test]
    fn test_accumulation_peaks_at_outlet() {
        let grid = SyntheticBasins::row_of_squares(&[1, 2], 4, 1.0, &[1.0, 1.0]);
        let acc = grid.accumulation();
        for basin in &grid.basins {
            let (oc, or) = basin.outlet_cell();
            let peak = acc[or * grid.width + oc];
            let others = (basin.row_off..basin.row_off + basin.size)
                .flat_map(|r| (basin.col_off..basin.col_off + basin.size).map(move |c| (c, r)))
                .filter(|&cell| cell != (oc, or));
            for (c, r) in others {
                assert!(acc[r * grid.width + c] < peak);
            }
        }
    }

    #[test]
    fn test_direction_outlet_codes() {
        let grid = SyntheticBasins::row_of_squares(&[1, 2], 3, 1.0, &[4.0, 0.0]);
        let dir = grid.direction();
        assert_eq!(dir[grid.width + 2], 4.0);
        assert_eq!(dir[grid.width + 5], 0.0);
        assert_eq!(dir[0], 1.0);
    }

    #[test]
    fn test_geojson_has_features() {
        let grid = SyntheticBasins::row_of_squares(&[7], 2, 5.0, &[1.0]);
        let value: Value = serde_json::from_str(&grid.geojson(Some("EPSG:26913"))).unwrap();
        assert_eq!(value["features"][0]["properties"]["wsid"], json!(7));
        assert_eq!(value["crs"]["properties"]["name"], json!("EPSG:26913"));
    }
}
