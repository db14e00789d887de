//! Raster sources and geometry-clipped sampling.
//!
//! ```text
//! RasterSampler::sample(clip)
//!      │
//!      ├─► source.open()            (handle owned by this call, dropped on every path)
//!      │
//!      ├─► header: native transform, pixel size, nodata, CRS
//!      │
//!      ├─► clip bbox → pixel window (floor/ceil, clamped to raster)
//!      │
//!      ├─► reader.read_window(window)   band 1 only
//!      │
//!      └─► mask nodata and cells outside the polygon → NaN
//! ```

mod geotiff;
mod memory;

pub use geotiff::GeoTiffSource;
pub use memory::InMemoryRaster;

use basin_common::{BoundingBox, Coordinate, Crs, GeoTransform, PixelSize};
use geo::{BoundingRect, Intersects, MultiPolygon, Point, Rect};

use crate::error::{Result, RoutingError};

/// Pixel offsets closer than this to a whole number are snapped to it when
/// computing windows, so float noise in polygon coordinates does not pull in
/// an extra row or column.
const WINDOW_SNAP_TOLERANCE: f64 = 1e-6;

/// Grid-level description of a raster, read when the source is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub crs: Option<Crs>,
}

impl RasterHeader {
    pub fn pixel_size(&self) -> PixelSize {
        self.transform.pixel_size()
    }

    pub fn extent(&self) -> BoundingBox {
        self.transform.extent(self.width, self.height)
    }

    fn is_nodata(&self, value: f64) -> bool {
        match self.nodata {
            Some(nodata) if nodata.is_nan() => value.is_nan(),
            Some(nodata) => value == nodata,
            None => false,
        }
    }
}

/// A rectangular block of cells, in pixel units of the full raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the window lies entirely inside a `width` x `height` grid.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.col_off + self.width <= width && self.row_off + self.height <= height
    }
}

/// Something that can be opened to read single-band raster values.
///
/// Every call to [`open`](RasterSource::open) returns a fresh reader, so
/// concurrent workers never share a decoder.
pub trait RasterSource: Send + Sync {
    /// Name used in logs and errors (usually the file path).
    fn name(&self) -> &str;

    /// Open the source. The returned reader releases its resources on drop.
    fn open(&self) -> Result<Box<dyn RasterReader + '_>>;
}

/// An open raster handle.
pub trait RasterReader {
    fn header(&self) -> &RasterHeader;

    /// Read band 1 values for `window`, row-major.
    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f64>>;
}

/// Geometry used to clip a raster.
#[derive(Debug, Clone, Copy)]
pub enum ClipGeometry<'a> {
    /// Keep the cells of the polygon's bounding window whose centre lies in the polygon.
    Polygon(&'a MultiPolygon<f64>),
    /// The single cell containing the point.
    Point(Coordinate),
}

/// Clipped, masked values of one raster band.
///
/// Masked cells (outside the clip polygon, or nodata) hold `NaN`.
#[derive(Debug, Clone)]
pub struct RasterWindow {
    /// Cell values, row-major, top row first.
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
    /// Position of this window inside the full raster.
    pub window: PixelWindow,
    /// Transform of the window's own grid (origin at its top-left cell).
    pub transform: GeoTransform,
    /// Transform of the full source grid.
    pub native_transform: GeoTransform,
    /// Cell size of the full source grid.
    pub pixel_size: PixelSize,
    pub crs: Option<Crs>,
}

impl RasterWindow {
    /// Value at a window cell; `None` when outside or masked.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data
            .get(row * self.width + col)
            .copied()
            .filter(|value| !value.is_nan())
    }

    /// Number of unmasked cells.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|value| !value.is_nan()).count()
    }

    /// World extent covered by the window.
    pub fn extent(&self) -> BoundingBox {
        self.transform.extent(self.width, self.height)
    }
}

/// Clips a raster source to watershed polygons or outlet points.
pub struct RasterSampler<'a> {
    source: &'a dyn RasterSource,
    all_touched: bool,
}

impl<'a> RasterSampler<'a> {
    pub fn new(source: &'a dyn RasterSource) -> Self {
        Self {
            source,
            all_touched: false,
        }
    }

    /// Keep every cell that touches the polygon instead of only cells whose
    /// centre is inside it.
    pub fn with_all_touched(mut self, all_touched: bool) -> Self {
        self.all_touched = all_touched;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Open the source, read the window covering `clip` and mask it.
    pub fn sample(&self, clip: &ClipGeometry<'_>) -> Result<RasterWindow> {
        let mut reader = self.source.open()?;
        let header = reader.header().clone();

        let window = match clip {
            ClipGeometry::Polygon(polygon) => self.polygon_window(&header, polygon)?,
            ClipGeometry::Point(point) => self.point_window(&header, *point)?,
        };

        let mut data = reader.read_window(&window)?;
        drop(reader);

        for value in data.iter_mut() {
            if header.is_nodata(*value) {
                *value = f64::NAN;
            }
        }

        let transform = header.transform.window(window.col_off, window.row_off);

        if let ClipGeometry::Polygon(polygon) = clip {
            self.mask_outside(&mut data, &window, &transform, polygon);
            if data.iter().all(|value| value.is_nan()) {
                return Err(RoutingError::raster_access(
                    self.source.name(),
                    "no unmasked cells inside the clip geometry",
                ));
            }
        }

        tracing::trace!(
            raster = self.source.name(),
            col_off = window.col_off,
            row_off = window.row_off,
            width = window.width,
            height = window.height,
            "Sampled raster window"
        );

        Ok(RasterWindow {
            data,
            width: window.width,
            height: window.height,
            window,
            transform,
            native_transform: header.transform,
            pixel_size: header.pixel_size(),
            crs: header.crs,
        })
    }

    /// Value of the single cell containing `point` (`NaN` for nodata).
    pub fn sample_point(&self, point: Coordinate) -> Result<f64> {
        let window = self.sample(&ClipGeometry::Point(point))?;
        Ok(window.data.first().copied().unwrap_or(f64::NAN))
    }

    fn polygon_window(
        &self,
        header: &RasterHeader,
        polygon: &MultiPolygon<f64>,
    ) -> Result<PixelWindow> {
        let rect = polygon.bounding_rect().ok_or_else(|| {
            RoutingError::raster_access(self.source.name(), "clip geometry is empty")
        })?;

        let corners = [
            Coordinate::new(rect.min().x, rect.min().y),
            Coordinate::new(rect.max().x, rect.min().y),
            Coordinate::new(rect.min().x, rect.max().y),
            Coordinate::new(rect.max().x, rect.max().y),
        ];

        let (mut min_col, mut min_row) = (f64::INFINITY, f64::INFINITY);
        let (mut max_col, mut max_row) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for corner in corners {
            let (col, row) = header.transform.world_to_pixel(corner).ok_or_else(|| {
                RoutingError::raster_access(self.source.name(), "raster transform is not invertible")
            })?;
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
        }

        let col_start = snap(min_col).floor().max(0.0);
        let row_start = snap(min_row).floor().max(0.0);
        let col_stop = snap(max_col).ceil().min(header.width as f64);
        let row_stop = snap(max_row).ceil().min(header.height as f64);

        if col_start >= col_stop || row_start >= row_stop {
            return Err(RoutingError::raster_access(
                self.source.name(),
                format!(
                    "geometry bounds ({:.3}, {:.3}, {:.3}, {:.3}) do not intersect the raster extent",
                    rect.min().x,
                    rect.min().y,
                    rect.max().x,
                    rect.max().y
                ),
            ));
        }

        Ok(PixelWindow::new(
            col_start as usize,
            row_start as usize,
            (col_stop - col_start) as usize,
            (row_stop - row_start) as usize,
        ))
    }

    fn point_window(&self, header: &RasterHeader, point: Coordinate) -> Result<PixelWindow> {
        let (col, row) = header.transform.world_to_pixel(point).ok_or_else(|| {
            RoutingError::raster_access(self.source.name(), "raster transform is not invertible")
        })?;

        let (col, row) = (col.floor(), row.floor());
        if col < 0.0 || row < 0.0 || col >= header.width as f64 || row >= header.height as f64 {
            return Err(RoutingError::raster_access(
                self.source.name(),
                format!(
                    "point ({:.3}, {:.3}) is outside the raster extent",
                    point.x, point.y
                ),
            ));
        }

        Ok(PixelWindow::new(col as usize, row as usize, 1, 1))
    }

    fn mask_outside(
        &self,
        data: &mut [f64],
        window: &PixelWindow,
        transform: &GeoTransform,
        polygon: &MultiPolygon<f64>,
    ) {
        for row in 0..window.height {
            for col in 0..window.width {
                let idx = row * window.width + col;
                if data[idx].is_nan() {
                    continue;
                }
                let keep = if self.all_touched {
                    let a = transform.pixel_to_world(col as f64, row as f64);
                    let b = transform.pixel_to_world(col as f64 + 1.0, row as f64 + 1.0);
                    let cell = Rect::new((a.x, a.y), (b.x, b.y)).to_polygon();
                    polygon.intersects(&cell)
                } else {
                    let center = transform.pixel_center(col, row);
                    polygon.intersects(&Point::new(center.x, center.y))
                };
                if !keep {
                    data[idx] = f64::NAN;
                }
            }
        }
    }
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < WINDOW_SNAP_TOLERANCE {
        rounded
    } else {
        value
    }
}
