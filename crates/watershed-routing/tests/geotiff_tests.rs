//! Routing from GeoTIFF and GeoJSON files on disk.

use std::path::Path;

use test_utils::fixtures::{self, crs};
use test_utils::{
    assert_coords_approx_eq, require_test_files, temp_test_dir, write_f32_geotiff,
    write_u8_geotiff, GeoTiffSpec, SyntheticBasins,
};
use watershed_routing::{
    Coordinate, Crs, GeoTiffSource, PixelWindow, RasterReader, RasterSampler, RasterSource,
    RoutingConfig, RoutingError, WatershedCollection, WatershedRouter,
};

fn write_inputs(dir: &Path, grid: &SyntheticBasins) -> (GeoTiffSource, GeoTiffSource) {
    let spec = GeoTiffSpec::new(grid.width, grid.height, grid.transform())
        .with_epsg(crs::EPSG_26913)
        .with_nodata(-9999.0);
    let facc = dir.join("facc.tif");
    let fdir = dir.join("fdir.tif");
    write_f32_geotiff(&facc, &spec, &grid.accumulation()).unwrap();
    write_u8_geotiff(&fdir, &spec.with_nodata(255.0), &grid.direction()).unwrap();
    (GeoTiffSource::new(facc), GeoTiffSource::new(fdir))
}

#[test]
fn test_geotiff_header() {
    let dir = temp_test_dir();
    let grid = fixtures::three_square_chain();
    let (accumulation, direction) = write_inputs(dir.path(), &grid);

    let reader = accumulation.open().unwrap();
    let header = reader.header();
    assert_eq!(header.width, 12);
    assert_eq!(header.height, 4);
    assert_eq!(header.crs, Some(Crs::from_epsg(26913)));
    assert_eq!(header.nodata, Some(-9999.0));
    assert_coords_approx_eq!(
        (header.transform.origin_x, header.transform.origin_y),
        (0.0, 40.0),
        1e-9
    );
    assert_eq!(header.pixel_size().x, 10.0);
    assert_eq!(header.pixel_size().y, 10.0);
    drop(reader);

    let reader = direction.open().unwrap();
    assert_eq!(reader.header().nodata, Some(255.0));
}

#[test]
fn test_geotiff_point_samples() {
    let dir = temp_test_dir();
    let grid = fixtures::three_square_chain();
    let (accumulation, direction) = write_inputs(dir.path(), &grid);

    let (col, row) = grid.basins[0].outlet_cell();
    let (x, y) = grid.cell_center(col, row);
    let peak = RasterSampler::new(&accumulation)
        .sample_point(Coordinate::new(x, y))
        .unwrap();
    assert_eq!(peak, 1000.0);

    let code = RasterSampler::new(&direction)
        .sample_point(Coordinate::new(x, y))
        .unwrap();
    assert_eq!(code, 1.0);
}

#[test]
fn test_pixel_is_point_shifts_origin_half_a_cell() {
    let dir = temp_test_dir();
    let path = dir.path().join("point.tif");
    // Tiepoint written at the first cell's centre (5, 35)
    let spec = GeoTiffSpec::new(4, 4, [0.0, 10.0, 0.0, 40.0, 0.0, -10.0])
        .with_epsg(crs::EPSG_26913)
        .with_pixel_is_point();
    let data: Vec<f64> = (0..16).map(f64::from).collect();
    write_f32_geotiff(&path, &spec, &data).unwrap();

    let source = GeoTiffSource::new(&path);
    let reader = source.open().unwrap();
    let transform = reader.header().transform;
    assert_coords_approx_eq!((transform.origin_x, transform.origin_y), (0.0, 40.0), 1e-9);
    drop(reader);

    // Centre of cell (1, 2) is (15, 15)
    let value = RasterSampler::new(&source)
        .sample_point(Coordinate::new(15.0, 15.0))
        .unwrap();
    assert_eq!(value, 9.0);
}

#[test]
fn test_window_spanning_several_strips() {
    let dir = temp_test_dir();
    let path = dir.path().join("strips.tif");
    let (width, height) = (20, 30);
    let spec = GeoTiffSpec::new(width, height, [0.0, 1.0, 0.0, 30.0, 0.0, -1.0])
        .with_rows_per_strip(7);
    let data: Vec<f64> = (0..width * height).map(|v| v as f64).collect();
    write_f32_geotiff(&path, &spec, &data).unwrap();

    let source = GeoTiffSource::new(&path);
    let mut reader = source.open().unwrap();
    // Rows 3..26 cross strips 0 to 3
    let window = PixelWindow::new(6, 3, 5, 23);
    let values = reader.read_window(&window).unwrap();

    let expected: Vec<f64> = (window.row_off..window.row_off + window.height)
        .flat_map(|row| {
            (window.col_off..window.col_off + window.width).map(move |col| (row * width + col) as f64)
        })
        .collect();
    assert_eq!(values, expected);
}

#[test]
fn test_route_from_files() {
    let dir = temp_test_dir();
    let grid = fixtures::three_square_chain();
    let (accumulation, direction) = write_inputs(dir.path(), &grid);

    let input = dir.path().join("basins.geojson");
    std::fs::write(&input, grid.geojson(Some(crs::UTM_13N_URN))).unwrap();
    let mut watersheds = WatershedCollection::from_geojson_file(&input, "wsid").unwrap();

    let router =
        WatershedRouter::new(&accumulation, &direction, RoutingConfig::default()).unwrap();
    let report = router.preflight(&watersheds).unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let summary = router.route_collection(&mut watersheds).unwrap();
    assert_eq!(summary.failed, 0);

    let output = dir.path().join("routed.geojson");
    watersheds.write_geojson(&output, "dsid").unwrap();
    let routed = WatershedCollection::from_geojson_file(&output, "wsid").unwrap();
    assert_eq!(routed.crs(), Some(Crs::from_epsg(26913)));

    let text = std::fs::read_to_string(&output).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let dsids: Vec<i64> = value["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"]["dsid"].as_i64().unwrap())
        .collect();
    assert_eq!(dsids, vec![2, 3, -1]);
}

#[test]
fn test_parallel_from_files() {
    let dir = temp_test_dir();
    let grid = fixtures::square_ring();
    let (accumulation, direction) = write_inputs(dir.path(), &grid);
    let watersheds = WatershedCollection::from_geojson_str(&grid.geojson(None), "wsid").unwrap();

    let config = RoutingConfig {
        parallel: true,
        threads: Some(3),
        ..RoutingConfig::default()
    };
    let router = WatershedRouter::new(&accumulation, &direction, config).unwrap();
    let result = router.route(&watersheds).unwrap();
    assert_eq!(result.dsids(), vec![Some(2), Some(3), Some(4), Some(1)]);
}

#[test]
fn test_missing_raster_is_recorded_per_watershed() {
    let dir = temp_test_dir();
    let grid = fixtures::three_square_chain();
    let (_, direction) = write_inputs(dir.path(), &grid);
    let accumulation = GeoTiffSource::new(dir.path().join("missing.tif"));
    let watersheds = WatershedCollection::from_geojson_str(&grid.geojson(None), "wsid").unwrap();

    let router =
        WatershedRouter::new(&accumulation, &direction, RoutingConfig::default()).unwrap();
    assert!(matches!(
        router.preflight(&watersheds),
        Err(RoutingError::RasterAccess { .. })
    ));

    let result = router.route(&watersheds).unwrap();
    assert_eq!(result.summary.failed, 3);
    assert_eq!(result.dsids(), vec![None, None, None]);
}

/// Runs against real data when `facc.tif`, `fdir.tif` and `basins.geojson`
/// are available (see `TEST_DATA_DIR`).
#[test]
fn test_real_basins() {
    let paths = require_test_files!("facc.tif", "fdir.tif", "basins.geojson");
    let accumulation = GeoTiffSource::new(&paths[0]);
    let direction = GeoTiffSource::new(&paths[1]);
    let watersheds = WatershedCollection::from_geojson_file(&paths[2], "wsid").unwrap();

    let router =
        WatershedRouter::new(&accumulation, &direction, RoutingConfig::default()).unwrap();
    let result = router.route(&watersheds).unwrap();

    let ids: Vec<i64> = watersheds.iter().map(|w| w.wsid).collect();
    for (watershed, dsid) in watersheds.iter().zip(result.dsids()) {
        if let Some(dsid) = dsid {
            assert_ne!(dsid, watershed.wsid);
            assert!(dsid == -1 || ids.contains(&dsid));
        }
    }
}
