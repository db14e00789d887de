//! Watershed-to-watershed drainage routing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use basin_common::{BoundingBox, Coordinate, Crs, PixelSize};
use chrono::{DateTime, Utc};
use geo::{Contains, Point};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ErrorPolicy, RoutingConfig, SearchExtent};
use crate::direction::FlowDirectionTable;
use crate::error::{Result, RouteError, RouteStage, RoutingError};
use crate::outlet::locate_outlet;
use crate::raster::{ClipGeometry, RasterHeader, RasterSampler, RasterSource};
use crate::spatial::{self, SpatialIndex};
use crate::watershed::{Watershed, WatershedCollection};

/// Relative difference above which two pixel sizes are reported as different.
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Result of routing one watershed.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Drains into the watershed at `position`.
    Downstream { wsid: i64, position: usize },
    /// Drains out of the study area.
    Terminal,
    /// Could not be routed.
    Failed(RouteError),
}

impl RouteOutcome {
    /// Value for the downstream column: a wsid, `-1` for terminal, `None` on failure.
    pub fn dsid(&self) -> Option<i64> {
        match self {
            Self::Downstream { wsid, .. } => Some(*wsid),
            Self::Terminal => Some(-1),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RouteError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Counts for one routing run.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingSummary {
    pub total: usize,
    /// Watersheds that drain into another watershed.
    pub routed: usize,
    /// Watersheds that drain out of the study area.
    pub terminal: usize,
    pub failed: usize,
    /// Probes resolved by scanning every watershed after the indexed search missed.
    pub full_scans: usize,
    /// Watersheds whose probe fell back inside their own polygon.
    pub self_drains: usize,
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
}

impl RoutingSummary {
    fn from_outcomes(
        outcomes: &[RouteOutcome],
        full_scans: usize,
        self_drains: usize,
        started: Instant,
    ) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            routed: 0,
            terminal: 0,
            failed: 0,
            full_scans,
            self_drains,
            elapsed_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };
        for outcome in outcomes {
            match outcome {
                RouteOutcome::Downstream { .. } => summary.routed += 1,
                RouteOutcome::Terminal => summary.terminal += 1,
                RouteOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Whether every watershed was routed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Outcomes in collection order, plus the run summary.
#[derive(Debug)]
pub struct RoutingResult {
    pub outcomes: Vec<RouteOutcome>,
    pub summary: RoutingSummary,
}

impl RoutingResult {
    /// `dsid` values in collection order.
    pub fn dsids(&self) -> Vec<Option<i64>> {
        self.outcomes.iter().map(RouteOutcome::dsid).collect()
    }

    /// Failed watersheds in collection order.
    pub fn failures(&self) -> impl Iterator<Item = &RouteError> {
        self.outcomes.iter().filter_map(RouteOutcome::error)
    }
}

/// What the preflight checks found. Mismatches are warnings, not errors.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub accumulation: RasterHeader,
    pub direction: RasterHeader,
    pub warnings: Vec<String>,
}

/// Per-watershed result before it is turned into a [`RouteOutcome`].
struct Traced {
    downstream: Option<usize>,
    full_scan: bool,
    self_drain: bool,
}

/// Routes each watershed to the watershed its outlet drains into.
///
/// ```text
/// for each watershed (input order, or on a rayon pool):
///   accumulation clipped to polygon ─► outlet = max cell centre
///   direction at outlet ─► code ─► probe = outlet + offset * pixel size
///   R-tree candidates (own bbox [+ probe]) ─► strict point-in-polygon
///   ─► Downstream(wsid) | Terminal (-1) | Failed(stage, error)
/// apply all outcomes after the pass
/// ```
pub struct WatershedRouter<'a> {
    accumulation: &'a dyn RasterSource,
    direction: &'a dyn RasterSource,
    config: RoutingConfig,
    table: FlowDirectionTable,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> WatershedRouter<'a> {
    pub fn new(
        accumulation: &'a dyn RasterSource,
        direction: &'a dyn RasterSource,
        config: RoutingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let table = config.direction_table();

        let pool = if config.parallel {
            let mut builder = rayon::ThreadPoolBuilder::new()
                .thread_name(|i| format!("watershed-route-{}", i));
            if let Some(threads) = config.threads {
                builder = builder.num_threads(threads);
            }
            let pool = builder
                .build()
                .map_err(|e| RoutingError::config(format!("cannot start thread pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            accumulation,
            direction,
            config,
            table,
            pool,
        })
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn direction_table(&self) -> &FlowDirectionTable {
        &self.table
    }

    /// Open both rasters once and compare their grids and CRS with each other
    /// and with the watershed collection.
    pub fn preflight(&self, collection: &WatershedCollection) -> Result<PreflightReport> {
        let accumulation = self.accumulation.open()?.header().clone();
        let direction = self.direction.open()?.header().clone();
        let mut warnings = Vec::new();

        match (accumulation.crs, direction.crs) {
            (Some(a), Some(d)) if a != d => warnings.push(format!(
                "accumulation CRS {} differs from direction CRS {}",
                a, d
            )),
            _ => {}
        }

        if let (Some(declared), Some(raster)) = (collection.crs(), accumulation.crs.or(direction.crs))
        {
            if declared != raster {
                warnings.push(format!(
                    "watershed CRS {} differs from raster CRS {}",
                    declared, raster
                ));
            }
        }

        let (a, d) = (accumulation.pixel_size(), direction.pixel_size());
        if !same_pixel_size(a, d) {
            warnings.push(format!(
                "accumulation pixel size {}x{} differs from direction pixel size {}x{}",
                a.x, a.y, d.x, d.y
            ));
        }

        let extent = accumulation.extent();
        let outside = collection
            .iter()
            .filter(|w| !w.bbox.intersects(&extent))
            .count();
        if outside > 0 {
            warnings.push(format!(
                "{} watershed(s) lie entirely outside the accumulation raster",
                outside
            ));
        }

        let duplicates = collection.duplicate_ids();
        if !duplicates.is_empty() {
            warnings.push(format!(
                "duplicate {} values: {:?}",
                collection.id_field(),
                duplicates
            ));
        }

        for warning in &warnings {
            tracing::warn!(warning = %warning, "Preflight check");
        }

        tracing::info!(
            accumulation = self.accumulation.name(),
            direction = self.direction.name(),
            width = accumulation.width,
            height = accumulation.height,
            crs = %display_crs(accumulation.crs),
            warnings = warnings.len(),
            "Preflight complete"
        );

        Ok(PreflightReport {
            accumulation,
            direction,
            warnings,
        })
    }

    /// Route every watershed in `collection`.
    ///
    /// With [`ErrorPolicy::Abort`] the first failure (lowest position) is
    /// returned; otherwise failures are recorded as [`RouteOutcome::Failed`].
    pub fn route(
        &self,
        collection: &WatershedCollection,
    ) -> std::result::Result<RoutingResult, RouteError> {
        let started = Instant::now();
        let index = SpatialIndex::build(collection);
        let progress = AtomicUsize::new(0);
        let full_scans = AtomicUsize::new(0);
        let self_drains = AtomicUsize::new(0);

        tracing::info!(
            watersheds = collection.len(),
            parallel = self.pool.is_some(),
            convention = %self.config.direction_convention,
            search_extent = %self.config.search_extent,
            error_policy = %self.config.error_policy,
            "Routing watersheds"
        );

        let route_one = |watershed: &Watershed| -> RouteOutcome {
            let outcome = match self.trace(watershed, collection, &index) {
                Ok(traced) => {
                    if traced.full_scan {
                        full_scans.fetch_add(1, Ordering::Relaxed);
                    }
                    if traced.self_drain {
                        self_drains.fetch_add(1, Ordering::Relaxed);
                    }
                    match traced.downstream.and_then(|p| collection.get(p)) {
                        Some(downstream) => RouteOutcome::Downstream {
                            wsid: downstream.wsid,
                            position: downstream.position,
                        },
                        None => RouteOutcome::Terminal,
                    }
                }
                Err(error) => RouteOutcome::Failed(error),
            };
            self.log_outcome(watershed, &outcome);

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % self.config.progress_interval == 0 {
                tracing::info!(done, total = collection.len(), "Routing progress");
            }
            outcome
        };

        let mut outcomes: Vec<RouteOutcome> = match &self.pool {
            Some(pool) => pool.install(|| {
                collection
                    .watersheds()
                    .par_iter()
                    .map(&route_one)
                    .collect()
            }),
            None => {
                let mut outcomes = Vec::with_capacity(collection.len());
                for watershed in collection.iter() {
                    let outcome = route_one(watershed);
                    let stop = outcome.is_failed() && self.config.error_policy == ErrorPolicy::Abort;
                    outcomes.push(outcome);
                    if stop {
                        break;
                    }
                }
                outcomes
            }
        };

        if self.config.error_policy == ErrorPolicy::Abort {
            if let Some(position) = outcomes.iter().position(RouteOutcome::is_failed) {
                if let RouteOutcome::Failed(error) = outcomes.swap_remove(position) {
                    tracing::error!(
                        wsid = error.wsid,
                        position = error.position,
                        stage = %error.stage,
                        "Routing aborted"
                    );
                    return Err(error);
                }
            }
        }

        let summary = RoutingSummary::from_outcomes(
            &outcomes,
            full_scans.into_inner(),
            self_drains.into_inner(),
            started,
        );

        tracing::info!(
            total = summary.total,
            routed = summary.routed,
            terminal = summary.terminal,
            failed = summary.failed,
            full_scans = summary.full_scans,
            self_drains = summary.self_drains,
            elapsed_ms = summary.elapsed_ms,
            "Routing complete"
        );

        Ok(RoutingResult { outcomes, summary })
    }

    /// Route `collection` and write the outcomes into its `dsid` column.
    pub fn route_collection(
        &self,
        collection: &mut WatershedCollection,
    ) -> std::result::Result<RoutingSummary, RouteError> {
        let result = self.route(collection)?;
        collection.apply_outcomes(&result.outcomes);
        Ok(result.summary)
    }

    fn trace(
        &self,
        watershed: &Watershed,
        collection: &WatershedCollection,
        index: &SpatialIndex,
    ) -> std::result::Result<Traced, RouteError> {
        let fail = |stage: RouteStage| {
            move |error: RoutingError| {
                RouteError::new(watershed.wsid, watershed.position, stage, error)
            }
        };

        let window = RasterSampler::new(self.accumulation)
            .with_all_touched(self.config.all_touched)
            .sample(&ClipGeometry::Polygon(&watershed.geometry))
            .map_err(fail(RouteStage::SampleAccumulation))?;

        let outlet = locate_outlet(&window).map_err(fail(RouteStage::LocateOutlet))?;

        let code = RasterSampler::new(self.direction)
            .sample_point(outlet.coordinate)
            .map_err(fail(RouteStage::SampleDirection))?;

        let probe = self
            .table
            .project(outlet.coordinate, code, window.pixel_size)
            .map_err(fail(RouteStage::ProjectProbe))?;

        let extent = self.search_extent(&watershed.bbox, probe);
        let skip = self.config.exclude_self.then_some(watershed.position);
        let candidates = index.candidates(&extent);
        let mut downstream = spatial::resolve(probe, &candidates, collection, skip);

        // The bbox-only query can miss polygons that reach the probe from outside it.
        let mut full_scan = false;
        if downstream.is_none()
            && self.config.full_scan_fallback
            && !extent.contains_point(probe.x, probe.y)
        {
            downstream = spatial::scan_all(probe, collection, skip);
            full_scan = true;
        }

        // Checked against the own polygon directly, since exclusion hides it from resolve.
        let self_drain = watershed.geometry.contains(&Point::new(probe.x, probe.y));
        if self_drain {
            tracing::warn!(
                wsid = watershed.wsid,
                position = watershed.position,
                probe_x = probe.x,
                probe_y = probe.y,
                excluded = self.config.exclude_self,
                dsid = ?downstream.and_then(|p| collection.get(p)).map(|w| w.wsid),
                "Watershed drains into itself"
            );
        }

        tracing::trace!(
            wsid = watershed.wsid,
            outlet_x = outlet.coordinate.x,
            outlet_y = outlet.coordinate.y,
            accumulation = outlet.accumulation,
            code,
            probe_x = probe.x,
            probe_y = probe.y,
            step = outlet.coordinate.distance_to(&probe),
            candidates = candidates.len(),
            "Traced outlet"
        );

        Ok(Traced {
            downstream,
            full_scan,
            self_drain,
        })
    }

    fn search_extent(&self, bbox: &BoundingBox, probe: Coordinate) -> BoundingBox {
        match self.config.search_extent {
            SearchExtent::WatershedBounds => *bbox,
            SearchExtent::WatershedAndProbe => bbox.include_point(probe),
        }
    }

    fn log_outcome(&self, watershed: &Watershed, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Failed(error) => tracing::warn!(
                wsid = watershed.wsid,
                position = watershed.position,
                stage = %error.stage,
                kind = error.error.kind(),
                error = %error.error,
                "Watershed could not be routed"
            ),
            _ => tracing::debug!(
                wsid = watershed.wsid,
                position = watershed.position,
                dsid = ?outcome.dsid(),
                "Routed watershed"
            ),
        }
    }
}

fn same_pixel_size(a: PixelSize, b: PixelSize) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() <= PIXEL_SIZE_TOLERANCE * x.abs().max(y.abs());
    close(a.x, b.x) && close(a.y, b.y)
}

fn display_crs(crs: Option<Crs>) -> String {
    crs.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
