//! Affine georeferencing for raster grids.

use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// A geographic (or projected) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Translate the point by `(dx, dy)` coordinate units.
    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Euclidean distance in coordinate units.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Absolute cell size of a raster grid in coordinate units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
}

/// Affine pixel → world mapping, in GDAL coefficient order.
///
/// ```text
/// x = origin_x + col * pixel_width  + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// `(col, row) = (0, 0)` is the outer corner of the top-left cell. For the
/// usual north-up raster `pixel_height` is negative: rows grow downward while
/// world y grows upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(
        origin_x: f64,
        pixel_width: f64,
        row_rotation: f64,
        origin_y: f64,
        col_rotation: f64,
        pixel_height: f64,
    ) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation,
            origin_y,
            col_rotation,
            pixel_height,
        }
    }

    /// North-up transform anchored at the top-left corner `(origin_x, origin_y)`.
    ///
    /// `cell_width` and `cell_height` are given as positive sizes.
    pub fn north_up(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self::new(
            origin_x,
            cell_width.abs(),
            0.0,
            origin_y,
            0.0,
            -cell_height.abs(),
        )
    }

    /// Build from a GeoTIFF tie point (`I, J, K, X, Y, Z`) and pixel scale (`Sx, Sy, Sz`).
    pub fn from_tiepoint_and_scale(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);
        Some(Self::new(x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy))
    }

    /// Build from a GeoTIFF 4x4 model transformation matrix (row-major).
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 16 {
            return None;
        }
        Some(Self::new(
            matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5],
        ))
    }

    /// World coordinate of a fractional pixel position.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> Coordinate {
        Coordinate::new(
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// World coordinate of the centre of cell `(col, row)`.
    pub fn pixel_center(&self, col: usize, row: usize) -> Coordinate {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional pixel position `(col, row)` of a world coordinate.
    ///
    /// Returns `None` for a degenerate (non-invertible) transform.
    pub fn world_to_pixel(&self, point: Coordinate) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = point.x - self.origin_x;
        let dy = point.y - self.origin_y;
        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (self.pixel_width * dy - self.col_rotation * dx) / det;
        Some((col, row))
    }

    /// Transform of a sub-window whose top-left cell is `(col_off, row_off)`.
    pub fn window(&self, col_off: usize, row_off: usize) -> Self {
        let origin = self.pixel_to_world(col_off as f64, row_off as f64);
        Self {
            origin_x: origin.x,
            origin_y: origin.y,
            ..*self
        }
    }

    /// Absolute x and y cell size.
    pub fn pixel_size(&self) -> PixelSize {
        PixelSize {
            x: self.pixel_width.abs(),
            y: self.pixel_height.abs(),
        }
    }

    /// True when the grid has no rotation terms.
    pub fn is_north_up(&self) -> bool {
        self.row_rotation == 0.0 && self.col_rotation == 0.0
    }

    /// World extent of a `width` x `height` grid under this transform.
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(width as f64, 0.0),
            self.pixel_to_world(0.0, height as f64),
            self.pixel_to_world(width as f64, height as f64),
        ];
        let mut bbox = BoundingBox::from_point(corners[0]);
        for corner in &corners[1..] {
            bbox = bbox.include_point(*corner);
        }
        bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_center() {
        let transform = GeoTransform::north_up(100.0, 200.0, 10.0, 10.0);
        let center = transform.pixel_center(0, 0);
        assert!((center.x - 105.0).abs() < 1e-9);
        assert!((center.y - 195.0).abs() < 1e-9);

        let center = transform.pixel_center(2, 3);
        assert!((center.x - 125.0).abs() < 1e-9);
        assert!((center.y - 165.0).abs() < 1e-9);
    }

    #[test]
    fn test_world_to_pixel_inverts_pixel_to_world() {
        let transform = GeoTransform::new(50.0, 2.0, 0.5, 80.0, 0.25, -3.0);
        let point = transform.pixel_to_world(7.25, 4.5);
        let (col, row) = transform.world_to_pixel(point).unwrap();
        assert!((col - 7.25).abs() < 1e-9);
        assert!((row - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_transform_has_no_inverse() {
        let transform = GeoTransform::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(transform.world_to_pixel(Coordinate::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn test_window_shifts_origin_only() {
        let transform = GeoTransform::north_up(0.0, 100.0, 5.0, 5.0);
        let window = transform.window(3, 2);
        assert_eq!(window.origin_x, 15.0);
        assert_eq!(window.origin_y, 90.0);
        assert_eq!(window.pixel_width, 5.0);
        assert_eq!(window.pixel_height, -5.0);
        assert_eq!(window.pixel_center(0, 0), transform.pixel_center(3, 2));
    }

    #[test]
    fn test_from_tiepoint_and_scale() {
        let transform = GeoTransform::from_tiepoint_and_scale(
            &[0.0, 0.0, 0.0, 440720.0, 3751320.0, 0.0],
            &[30.0, 30.0, 0.0],
        )
        .unwrap();
        assert_eq!(transform, GeoTransform::north_up(440720.0, 3751320.0, 30.0, 30.0));
        assert_eq!(transform.pixel_size(), PixelSize { x: 30.0, y: 30.0 });
    }

    #[test]
    fn test_from_model_transformation() {
        // North-up: same grid as the tiepoint/scale form
        #[rustfmt::skip]
        let matrix = [
            30.0, 0.0, 0.0, 440720.0,
            0.0, -30.0, 0.0, 3751320.0,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let transform = GeoTransform::from_model_transformation(&matrix).unwrap();
        assert_eq!(transform, GeoTransform::north_up(440720.0, 3751320.0, 30.0, 30.0));

        // Rotated: x = 100 + 2col + 0.5row, y = 200 + 0.25col - 3row
        #[rustfmt::skip]
        let matrix = [
            2.0, 0.5, 0.0, 100.0,
            0.25, -3.0, 0.0, 200.0,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let transform = GeoTransform::from_model_transformation(&matrix).unwrap();
        assert_eq!(transform, GeoTransform::new(100.0, 2.0, 0.5, 200.0, 0.25, -3.0));
        assert!(!transform.is_north_up());
        assert_eq!(transform.pixel_to_world(4.0, 2.0), Coordinate::new(109.0, 195.0));

        assert!(GeoTransform::from_model_transformation(&matrix[..12]).is_none());
    }

    #[test]
    fn test_extent() {
        let transform = GeoTransform::north_up(0.0, 10.0, 1.0, 1.0);
        assert_eq!(transform.extent(4, 10), BoundingBox::new(0.0, 0.0, 4.0, 10.0));
    }
}
