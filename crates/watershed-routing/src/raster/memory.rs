//! Raster held entirely in memory.

use std::sync::atomic::{AtomicUsize, Ordering};

use basin_common::{Crs, GeoTransform};

use super::{PixelWindow, RasterHeader, RasterReader, RasterSource};
use crate::error::{Result, RoutingError};

/// A single-band raster backed by a `Vec<f64>` (row-major, top row first).
///
/// Useful for synthetic inputs and for rasters that were decoded elsewhere.
#[derive(Debug)]
pub struct InMemoryRaster {
    name: String,
    header: RasterHeader,
    data: Vec<f64>,
    opens: AtomicUsize,
}

impl InMemoryRaster {
    pub fn new(
        name: impl Into<String>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        data: Vec<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if data.len() != width * height {
            return Err(RoutingError::raster_access(
                &name,
                format!(
                    "expected {} values for a {}x{} grid, got {}",
                    width * height,
                    width,
                    height,
                    data.len()
                ),
            ));
        }

        Ok(Self {
            name,
            header: RasterHeader {
                width,
                height,
                transform,
                nodata: None,
                crs: None,
            },
            data,
            opens: AtomicUsize::new(0),
        })
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.header.nodata = nodata;
        self
    }

    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.header.crs = crs;
        self
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    /// How many times the raster has been opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl RasterSource for InMemoryRaster {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn RasterReader + '_>> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemoryReader { raster: self }))
    }
}

struct InMemoryReader<'a> {
    raster: &'a InMemoryRaster,
}

impl RasterReader for InMemoryReader<'_> {
    fn header(&self) -> &RasterHeader {
        &self.raster.header
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f64>> {
        let header = &self.raster.header;
        if !window.fits_within(header.width, header.height) {
            return Err(RoutingError::raster_access(
                &self.raster.name,
                format!(
                    "window {:?} exceeds {}x{} grid",
                    window, header.width, header.height
                ),
            ));
        }

        let mut values = Vec::with_capacity(window.len());
        for row in window.row_off..window.row_off + window.height {
            let start = row * header.width + window.col_off;
            values.extend_from_slice(&self.raster.data[start..start + window.width]);
        }
        Ok(values)
    }
}
