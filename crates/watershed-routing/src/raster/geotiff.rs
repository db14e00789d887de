//! GeoTIFF raster source.
//!
//! Georeferencing is read from the standard GeoTIFF tags:
//!
//! | Tag | Use |
//! |-----|-----|
//! | ModelTransformation (34264) | full affine transform, preferred when present |
//! | ModelTiepoint (33922) + ModelPixelScale (33550) | north-up transform |
//! | GeoKeyDirectory (34735) | EPSG code and PixelIsArea / PixelIsPoint |
//! | GDAL_NODATA (42113) | nodata value |
//!
//! Only the strips or tiles overlapping the requested window are decoded.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use basin_common::{Crs, GeoTransform};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};

use super::{PixelWindow, RasterHeader, RasterReader, RasterSource};
use crate::error::{Result, RoutingError};

const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_TYPE: u16 = 3072;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED_CODE: u16 = 32767;
const PLANAR_SEPARATE: u16 = 2;

/// A GeoTIFF file on disk, opened anew for every read.
#[derive(Debug, Clone)]
pub struct GeoTiffSource {
    path: PathBuf,
    name: String,
}

impl GeoTiffSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterSource for GeoTiffSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn RasterReader + '_>> {
        Ok(Box::new(GeoTiffReader::open(&self.path, &self.name)?))
    }
}

struct GeoTiffReader<'a> {
    name: &'a str,
    decoder: Decoder<BufReader<File>>,
    header: RasterHeader,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    /// Distance between consecutive band-1 samples inside a decoded chunk.
    sample_stride: usize,
}

impl<'a> GeoTiffReader<'a> {
    fn open(path: &Path, name: &'a str) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| RoutingError::raster_access(name, format!("cannot open: {}", e)))?;
        let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_error(name))?;

        let (width, height) = decoder.dimensions().map_err(tiff_error(name))?;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let samples = samples_per_pixel(decoder.colortype().map_err(tiff_error(name))?)
            .ok_or_else(|| RoutingError::raster_access(name, "unsupported colour type"))?;
        let planar = optional_u16(&mut decoder, Tag::PlanarConfiguration)
            .map_err(tiff_error(name))?
            .unwrap_or(1);

        let geo_keys = optional_u16_vec(&mut decoder, Tag::GeoKeyDirectoryTag)
            .map_err(tiff_error(name))?
            .map(GeoKeys::parse)
            .unwrap_or_default();

        let mut transform = read_transform(&mut decoder)
            .map_err(tiff_error(name))?
            .ok_or_else(|| {
                RoutingError::raster_access(name, "no georeferencing tags (not a GeoTIFF?)")
            })?;
        if geo_keys.pixel_is_point {
            // Tie point refers to the centre of the first cell
            let corner = transform.pixel_to_world(-0.5, -0.5);
            transform.origin_x = corner.x;
            transform.origin_y = corner.y;
        }

        let nodata = read_nodata(&mut decoder).map_err(tiff_error(name))?;

        let width = width as usize;
        let chunk_width = chunk_width.max(1) as usize;
        let chunk_height = chunk_height.max(1) as usize;

        tracing::trace!(
            raster = name,
            width,
            height,
            chunk_width,
            chunk_height,
            samples,
            north_up = transform.is_north_up(),
            crs = ?geo_keys.crs,
            "Opened GeoTIFF"
        );

        Ok(Self {
            name,
            decoder,
            header: RasterHeader {
                width,
                height: height as usize,
                transform,
                nodata,
                crs: geo_keys.crs,
            },
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width),
            sample_stride: if planar == PLANAR_SEPARATE { 1 } else { samples },
        })
    }

    fn read_chunk(&mut self, index: usize) -> Result<(Vec<f64>, usize)> {
        let index = index as u32;
        let (data_width, _) = self.decoder.chunk_data_dimensions(index);
        let decoded = self
            .decoder
            .read_chunk(index)
            .map_err(tiff_error(self.name))?;
        let values = decoded_to_f64(decoded).ok_or_else(|| {
            RoutingError::raster_access(self.name, "unsupported sample format")
        })?;
        Ok((values, data_width as usize))
    }
}

impl RasterReader for GeoTiffReader<'_> {
    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Vec<f64>> {
        if !window.fits_within(self.header.width, self.header.height) {
            return Err(RoutingError::raster_access(
                self.name,
                format!(
                    "window {:?} exceeds {}x{} grid",
                    window, self.header.width, self.header.height
                ),
            ));
        }

        // chunk index → (values, data width)
        let mut chunks: HashMap<usize, (Vec<f64>, usize)> = HashMap::new();
        let mut values = Vec::with_capacity(window.len());

        for row in window.row_off..window.row_off + window.height {
            let chunk_row = row / self.chunk_height;
            let local_row = row % self.chunk_height;
            for col in window.col_off..window.col_off + window.width {
                let chunk_col = col / self.chunk_width;
                let local_col = col % self.chunk_width;
                let index = chunk_row * self.chunks_across + chunk_col;

                if !chunks.contains_key(&index) {
                    let chunk = self.read_chunk(index)?;
                    chunks.insert(index, chunk);
                }
                let (chunk, data_width) = &chunks[&index];
                let idx = (local_row * data_width + local_col) * self.sample_stride;
                let value = chunk.get(idx).copied().ok_or_else(|| {
                    RoutingError::raster_access(
                        self.name,
                        format!("chunk {} is shorter than expected", index),
                    )
                })?;
                values.push(value);
            }
        }

        Ok(values)
    }
}

fn tiff_error(name: &str) -> impl Fn(TiffError) -> RoutingError + '_ {
    move |err| RoutingError::raster_access(name, err.to_string())
}

fn samples_per_pixel(color: ColorType) -> Option<usize> {
    match color {
        ColorType::Gray(_) | ColorType::Palette(_) => Some(1),
        ColorType::GrayA(_) => Some(2),
        ColorType::RGB(_) | ColorType::YCbCr(_) => Some(3),
        ColorType::RGBA(_) | ColorType::CMYK(_) => Some(4),
        ColorType::Multiband { num_samples, .. } => Some(num_samples as usize),
        _ => None,
    }
}

fn decoded_to_f64(result: DecodingResult) -> Option<Vec<f64>> {
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(values)
}

type Reader = Decoder<BufReader<File>>;

fn optional_u16(decoder: &mut Reader, tag: Tag) -> tiff::TiffResult<Option<u16>> {
    match decoder.find_tag(tag)? {
        Some(value) => value.into_u16().map(Some),
        None => Ok(None),
    }
}

fn optional_u16_vec(decoder: &mut Reader, tag: Tag) -> tiff::TiffResult<Option<Vec<u16>>> {
    match decoder.find_tag(tag)? {
        Some(value) => value.into_u16_vec().map(Some),
        None => Ok(None),
    }
}

fn optional_f64_vec(decoder: &mut Reader, tag: Tag) -> tiff::TiffResult<Option<Vec<f64>>> {
    match decoder.find_tag(tag)? {
        Some(value) => value.into_f64_vec().map(Some),
        None => Ok(None),
    }
}

fn read_transform(decoder: &mut Reader) -> tiff::TiffResult<Option<GeoTransform>> {
    if let Some(matrix) = optional_f64_vec(decoder, Tag::ModelTransformationTag)? {
        if let Some(transform) = GeoTransform::from_model_transformation(&matrix) {
            return Ok(Some(transform));
        }
    }

    let tiepoint = optional_f64_vec(decoder, Tag::ModelTiepointTag)?;
    let scale = optional_f64_vec(decoder, Tag::ModelPixelScaleTag)?;
    Ok(match (tiepoint, scale) {
        (Some(tiepoint), Some(scale)) => GeoTransform::from_tiepoint_and_scale(&tiepoint, &scale),
        _ => None,
    })
}

fn read_nodata(decoder: &mut Reader) -> tiff::TiffResult<Option<f64>> {
    Ok(match decoder.find_tag(Tag::GdalNodata)? {
        Some(value) => value
            .into_string()
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok()),
        None => None,
    })
}

/// The subset of the GeoKey directory routing cares about.
#[derive(Debug, Default, PartialEq)]
struct GeoKeys {
    crs: Option<Crs>,
    pixel_is_point: bool,
}

impl GeoKeys {
    /// Parse a GeoKeyDirectory: a 4-value header followed by 4-value entries
    /// `(key, location, count, value)`. Only inline (location 0) values are read.
    fn parse(directory: Vec<u16>) -> Self {
        let mut keys = GeoKeys::default();
        let mut projected = None;
        let mut geographic = None;

        for entry in directory.chunks_exact(4).skip(1) {
            let (key, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 {
                continue;
            }
            match key {
                KEY_RASTER_TYPE => keys.pixel_is_point = value == RASTER_PIXEL_IS_POINT,
                KEY_PROJECTED_TYPE if value != USER_DEFINED_CODE => projected = Some(value),
                KEY_GEOGRAPHIC_TYPE if value != USER_DEFINED_CODE => geographic = Some(value),
                _ => {}
            }
        }

        keys.crs = projected
            .or(geographic)
            .map(|code| Crs::from_epsg(u32::from(code)));
        keys
    }
}
