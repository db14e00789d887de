//! Argument parsing and configuration assembly for the `watershed-route` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use watershed_routing::{DirectionConvention, ErrorPolicy, RoutingConfig};

#[derive(Parser, Debug)]
#[command(name = "watershed-route")]
#[command(about = "Route each watershed to the watershed it drains into")]
pub struct Args {
    /// Watershed polygons (GeoJSON FeatureCollection)
    #[arg(short, long, env = "ROUTING_WATERSHEDS")]
    pub watersheds: PathBuf,

    /// Flow accumulation GeoTIFF
    #[arg(short, long, env = "ROUTING_ACCUMULATION")]
    pub accumulation: PathBuf,

    /// D8 flow direction GeoTIFF
    #[arg(short, long, env = "ROUTING_DIRECTION")]
    pub direction: PathBuf,

    /// Output GeoJSON path (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, env = "ROUTING_CONFIG")]
    pub config: Option<PathBuf>,

    /// D8 encoding of the direction raster (esri, whitebox, taudem)
    #[arg(long)]
    pub convention: Option<DirectionConvention>,

    /// Stop at the first watershed that cannot be routed
    #[arg(long)]
    pub fail_fast: bool,

    /// Route watersheds on a thread pool
    #[arg(long)]
    pub parallel: bool,

    /// Worker threads for --parallel
    #[arg(long)]
    pub threads: Option<usize>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

/// Defaults, then the YAML file, then `ROUTING_*` variables, then flags.
pub fn load_config(args: &Args) -> Result<RoutingConfig> {
    let base = match &args.config {
        Some(path) => RoutingConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RoutingConfig::default(),
    };
    let mut config = base.with_env_overrides();

    if let Some(convention) = args.convention {
        config.use_convention(convention);
    }
    if args.fail_fast {
        config.error_policy = ErrorPolicy::Abort;
    }
    if args.parallel {
        config.parallel = true;
    }
    if let Some(threads) = args.threads {
        config.threads = Some(threads);
    }

    config.validate()?;
    Ok(config)
}
