//! Minimal GeoTIFF writer for file-level tests.
//!
//! Writes a single-band north-up image with ModelPixelScale, ModelTiepoint,
//! a GeoKey directory naming the EPSG code, and an optional GDAL_NODATA tag.
//! Key IDs in the GeoKey directory are written in ascending order.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// Georeferencing for a written GeoTIFF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTiffSpec {
    pub width: u32,
    pub height: u32,
    /// GDAL-order geotransform; rotation terms must be zero.
    pub transform: [f64; 6],
    pub epsg: Option<u16>,
    pub nodata: Option<f64>,
    /// Write RasterPixelIsPoint; the tiepoint then names the first cell's centre.
    pub pixel_is_point: bool,
    /// Strip height; the encoder's default when unset.
    pub rows_per_strip: Option<u32>,
}

impl GeoTiffSpec {
    pub fn new(width: usize, height: usize, transform: [f64; 6]) -> Self {
        Self {
            width: width as u32,
            height: height as u32,
            transform,
            epsg: None,
            nodata: None,
            pixel_is_point: false,
            rows_per_strip: None,
        }
    }

    pub fn with_epsg(mut self, epsg: u16) -> Self {
        self.epsg = Some(epsg);
        self
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_pixel_is_point(mut self) -> Self {
        self.pixel_is_point = true;
        self
    }

    pub fn with_rows_per_strip(mut self, rows: u32) -> Self {
        self.rows_per_strip = Some(rows);
        self
    }
}

fn to_io(err: tiff::TiffError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// GeoKey directory: model type (1024), raster type (1025), then the CRS
/// code (2048 geographic or 3072 projected).
fn geo_keys(epsg: Option<u16>, pixel_is_point: bool) -> Vec<u16> {
    let raster_type = if pixel_is_point { 2 } else { 1 };
    let (model_type, crs_key, code) = match epsg {
        Some(code @ (4326 | 4269 | 4258)) => (2, 2048, code),
        Some(code) => (1, 3072, code),
        None => (1, 3072, 32767),
    };
    let mut keys = vec![1, 1, 0, 0];
    keys.extend([1024, 0, 1, model_type]);
    keys.extend([1025, 0, 1, raster_type]);
    keys.extend([crs_key, 0, 1, code]);
    keys[3] = ((keys.len() - 4) / 4) as u16;
    keys
}

/// Write `data` (row-major, top row first) as a single-band GeoTIFF.
pub fn write_geotiff<C>(path: &Path, spec: &GeoTiffSpec, data: &[C::Inner]) -> io::Result<()>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    let [origin_x, pixel_width, _, origin_y, _, pixel_height] = spec.transform;
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file).map_err(to_io)?;
    let mut image = encoder
        .new_image::<C>(spec.width, spec.height)
        .map_err(to_io)?;

    if let Some(rows) = spec.rows_per_strip {
        image.rows_per_strip(rows).map_err(to_io)?;
    }

    let scale = [pixel_width.abs(), pixel_height.abs(), 0.0];
    let tiepoint = if spec.pixel_is_point {
        [0.0, 0.0, 0.0, origin_x + pixel_width / 2.0, origin_y + pixel_height / 2.0, 0.0]
    } else {
        [0.0, 0.0, 0.0, origin_x, origin_y, 0.0]
    };
    let keys = geo_keys(spec.epsg, spec.pixel_is_point);
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(to_io)?;
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(to_io)?;
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &keys[..])
        .map_err(to_io)?;
    if let Some(nodata) = spec.nodata {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, nodata.to_string().as_str())
            .map_err(to_io)?;
    }

    image.write_data(data).map_err(to_io)
}

/// Float accumulation-style raster.
pub fn write_f32_geotiff(path: &Path, spec: &GeoTiffSpec, data: &[f64]) -> io::Result<()> {
    let values: Vec<f32> = data.iter().map(|&v| v as f32).collect();
    write_geotiff::<colortype::Gray32Float>(path, spec, &values)
}

/// Byte direction-style raster. Values are truncated to `u8`.
pub fn write_u8_geotiff(path: &Path, spec: &GeoTiffSpec, data: &[f64]) -> io::Result<()> {
    let values: Vec<u8> = data.iter().map(|&v| v as u8).collect();
    write_geotiff::<colortype::Gray8>(path, spec, &values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_keys_projected() {
        let keys = geo_keys(Some(26913), false);
        assert_eq!(&keys[..4], &[1, 1, 0, 3]);
        assert_eq!(keys.len(), 16);
        assert_eq!(&keys[12..], &[3072, 0, 1, 26913]);
    }

    #[test]
    fn test_geo_keys_geographic() {
        let keys = geo_keys(Some(4326), false);
        assert_eq!(&keys[4..8], &[1024, 0, 1, 2]);
        assert_eq!(&keys[12..], &[2048, 0, 1, 4326]);
    }

    #[test]
    fn test_geo_keys_sorted_by_key_id() {
        for (epsg, point) in [(Some(26913), false), (Some(4326), true), (None, false)] {
            let keys = geo_keys(epsg, point);
            let ids: Vec<u16> = keys[4..].chunks_exact(4).map(|entry| entry[0]).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
            assert_eq!(keys[3] as usize, ids.len());
        }
    }

    #[test]
    fn test_geo_keys_pixel_is_point() {
        let keys = geo_keys(Some(26913), true);
        assert_eq!(&keys[8..12], &[1025, 0, 1, 2]);
        assert_eq!(&geo_keys(Some(26913), false)[8..12], &[1025, 0, 1, 1]);
    }

    #[test]
    fn test_write_creates_file() {
        let dir = crate::temp_test_dir();
        let path = dir.path().join("grid.tif");
        let spec = GeoTiffSpec::new(3, 2, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0]).with_nodata(-9999.0);
        write_f32_geotiff(&path, &spec, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
