//! Outlet location: the cell of maximum flow accumulation.

use basin_common::Coordinate;
use serde::Serialize;

use crate::error::{Result, RoutingError};
use crate::raster::RasterWindow;

/// The outlet cell of one watershed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outlet {
    /// Column within the clipped window.
    pub col: usize,
    /// Row within the clipped window.
    pub row: usize,
    /// Accumulation value at the outlet.
    pub accumulation: f64,
    /// Centre of the outlet cell.
    pub coordinate: Coordinate,
}

/// Find the unmasked cell with the largest accumulation.
///
/// Ties go to the first cell in row-major order, so the result does not
/// depend on how the window was scanned.
pub fn locate_outlet(window: &RasterWindow) -> Result<Outlet> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in window.data.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((idx, value)),
        }
    }

    let (idx, accumulation) = best.ok_or_else(|| {
        RoutingError::raster_access("accumulation window", "no unmasked cells to locate an outlet in")
    })?;

    let row = idx / window.width;
    let col = idx % window.width;

    Ok(Outlet {
        col,
        row,
        accumulation,
        coordinate: window.transform.pixel_center(col, row),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelWindow;
    use basin_common::{GeoTransform, PixelSize};

    fn window(width: usize, height: usize, data: Vec<f64>) -> RasterWindow {
        let transform = GeoTransform::north_up(100.0, 50.0, 10.0, 10.0);
        RasterWindow {
            data,
            width,
            height,
            window: PixelWindow::new(0, 0, width, height),
            transform,
            native_transform: transform,
            pixel_size: PixelSize { x: 10.0, y: 10.0 },
            crs: None,
        }
    }

    #[test]
    fn test_locates_maximum() {
        let w = window(3, 2, vec![1.0, 5.0, 2.0, 3.0, 9.0, 4.0]);
        let outlet = locate_outlet(&w).unwrap();
        assert_eq!((outlet.col, outlet.row), (1, 1));
        assert_eq!(outlet.accumulation, 9.0);
        assert_eq!(outlet.coordinate, Coordinate::new(115.0, 35.0));
    }

    #[test]
    fn test_ties_pick_first_in_row_major_order() {
        let w = window(3, 3, vec![1.0, 2.0, 7.0, 7.0, 3.0, 1.0, 0.0, 7.0, 7.0]);
        let outlet = locate_outlet(&w).unwrap();
        assert_eq!((outlet.col, outlet.row), (2, 0));
    }

    #[test]
    fn test_masked_cells_are_ignored() {
        let w = window(2, 2, vec![f64::NAN, 1.0, 4.0, f64::NAN]);
        let outlet = locate_outlet(&w).unwrap();
        assert_eq!((outlet.col, outlet.row), (0, 1));
    }

    #[test]
    fn test_outlet_on_window_edge_is_inside_extent() {
        // Maximum in the bottom-right corner cell
        let w = window(4, 3, (0..12).map(|v| v as f64).collect());
        let outlet = locate_outlet(&w).unwrap();
        assert_eq!((outlet.col, outlet.row), (3, 2));
        let extent = w.extent();
        assert!(extent.contains_point(outlet.coordinate.x, outlet.coordinate.y));
    }

    #[test]
    fn test_all_masked_fails() {
        let w = window(2, 1, vec![f64::NAN, f64::NAN]);
        assert!(matches!(
            locate_outlet(&w),
            Err(RoutingError::RasterAccess { .. })
        ));
    }
}
