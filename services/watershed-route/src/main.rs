//! Watershed drainage routing CLI.
//!
//! Reads watershed polygons and flow accumulation / direction GeoTIFFs,
//! and writes the polygons back with a downstream id on each.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use watershed_route::{load_config, Args};
use watershed_routing::{GeoTiffSource, WatershedCollection, WatershedRouter};

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for GeoJSON
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = load_config(&args)?;
    info!(
        convention = %config.direction_convention,
        search_extent = %config.search_extent,
        error_policy = %config.error_policy,
        parallel = config.parallel,
        "Loaded configuration"
    );

    let mut watersheds = WatershedCollection::from_geojson_file(&args.watersheds, &config.id_field)
        .with_context(|| format!("loading watersheds from {}", args.watersheds.display()))?;
    let accumulation = GeoTiffSource::new(&args.accumulation);
    let direction = GeoTiffSource::new(&args.direction);

    let router = WatershedRouter::new(&accumulation, &direction, config.clone())
        .context("configuring router")?;
    router
        .preflight(&watersheds)
        .context("opening input rasters")?;

    let summary = router
        .route_collection(&mut watersheds)
        .context("routing aborted")?;

    match &args.output {
        Some(path) => watersheds
            .write_geojson(path, &config.downstream_field)
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let body = watersheds.to_geojson_string(&config.downstream_field)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(body.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Wrote routing summary");
    }

    if !summary.is_complete() {
        tracing::warn!(
            failed = summary.failed,
            total = summary.total,
            "Some watersheds could not be routed"
        );
    }

    Ok(())
}
