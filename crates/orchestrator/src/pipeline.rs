//! The per-task processing pipeline.
//!
//! ```text
//! loading (0-5)
//!   -> for each kind: computing <kind> -> summarizing <kind> -> persisting <kind>
//!   -> synthesizing rsei -> summarizing rsei -> persisting rsei     (5-99)
//! ```
//!
//! Each index is persisted as soon as it is computed, so a later failure
//! leaves the earlier results stored. Only the four composite components
//! stay in memory past their own persist step, and only when `rsei` was
//! requested. Cancellation and the deadline are checked at every step
//! boundary; a step that has started always finishes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use eco_common::{
    BandInfo, CompositeProvenance, EcoError, EcoResult, IndexGrid, IndexKind, IndexResult,
    QualityWarning, RasterWindow, TaskStep,
};
use eco_indices::{
    required_roles, summarize, synthesize, BandSet, IndexCompute, IndexOutput, RseiComponents,
};
use raster_io::{decode_index_geotiff, encode_index_geotiff, epsg_code, GeoReference, RasterSource};
use renderer::render_preview;
use storage::ResultPaths;

use crate::orchestrator::WorkerContext;
use crate::registry::Job;

/// Why a pipeline stopped before completing.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Cancelled,
    Failed(EcoError),
}

impl From<EcoError> for Interrupt {
    fn from(err: EcoError) -> Self {
        Interrupt::Failed(err)
    }
}

type StepResult<T> = Result<T, Interrupt>;

/// A composite component kept for synthesis, with the result it is stored as.
struct Component {
    grid: Arc<IndexGrid>,
    result_id: Uuid,
}

/// A result ready to be written.
struct Prepared {
    result: IndexResult,
    geotiff: Vec<u8>,
    preview: Option<Vec<u8>>,
}

pub(crate) struct Pipeline<'a> {
    ctx: &'a WorkerContext,
    task_id: Uuid,
    job: Job,
    deadline: Option<(Instant, Duration)>,
    parameters: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a WorkerContext, task_id: Uuid, job: Job) -> Self {
        let deadline = job
            .deadline
            .or_else(|| ctx.config.default_deadline())
            .map(|d| (Instant::now() + d, d));
        let parameters = ctx.config.index.signature();
        Self {
            ctx,
            task_id,
            job,
            deadline,
            parameters,
        }
    }

    pub async fn run(&self) -> StepResult<()> {
        self.checkpoint()?;
        let wants_rsei = self.job.requested.contains(&IndexKind::Rsei);
        let mut components = self.load_reusable().await?;
        let to_compute: Vec<IndexKind> = self
            .expanded()
            .into_iter()
            .filter(|k| *k != IndexKind::Rsei && !components.contains_key(k))
            .collect();

        let mut source = if to_compute.is_empty() {
            None
        } else {
            Some(self.open_source().await?)
        };
        self.advance(5, TaskStep::Loading)?;

        let stages = Stages::new(to_compute.len() + usize::from(wants_rsei));
        for (i, &kind) in to_compute.iter().enumerate() {
            self.checkpoint()?;
            self.advance(stages.at(i, 0), TaskStep::Computing(kind))?;
            let Some(src) = source.take() else {
                return Err(EcoError::InternalError("raster source lost".to_string()).into());
            };
            let (src, output) = self.compute(kind, src).await?;
            source = Some(src);

            let warnings = output.warnings();
            let grid = Arc::new(output.grid);
            let result_id = self.emit(&stages, i, kind, &grid, warnings, None).await?;
            if wants_rsei && IndexKind::RSEI_COMPONENTS.contains(&kind) {
                components.insert(kind, Component { grid, result_id });
            }
        }
        drop(source);

        if wants_rsei {
            let i = to_compute.len();
            self.checkpoint()?;
            self.advance(stages.at(i, 0), TaskStep::Synthesizing)?;
            let (grid, provenance, warnings) = self.synthesize_rsei(&components).await?;
            drop(components);
            let grid = Arc::new(grid);
            self.emit(&stages, i, IndexKind::Rsei, &grid, warnings, Some(provenance))
                .await?;
        }
        Ok(())
    }

    /// Summarize and persist one produced grid, returning its result id.
    async fn emit(
        &self,
        stages: &Stages,
        i: usize,
        kind: IndexKind,
        grid: &Arc<IndexGrid>,
        warnings: Vec<QualityWarning>,
        composite: Option<CompositeProvenance>,
    ) -> StepResult<Uuid> {
        self.checkpoint()?;
        self.advance(stages.at(i, 1), TaskStep::Summarizing(kind))?;
        let mut item = self.prepare(kind, grid, warnings).await?;
        item.result.composite = composite;

        self.checkpoint()?;
        self.advance(stages.at(i, 2), TaskStep::Persisting(kind))?;
        let result_id = item.result.id;
        self.persist(item).await?;
        Ok(result_id)
    }

    fn expanded(&self) -> Vec<IndexKind> {
        let mut kinds = self.job.requested.clone();
        if kinds.contains(&IndexKind::Rsei) {
            kinds.extend(IndexKind::RSEI_COMPONENTS);
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }

    fn checkpoint(&self) -> StepResult<()> {
        if self.ctx.registry.cancel_requested(self.task_id) {
            return Err(Interrupt::Cancelled);
        }
        if let Some((at, limit)) = self.deadline {
            if Instant::now() >= at {
                return Err(EcoError::Timeout(format!(
                    "task exceeded its deadline of {:.3}s",
                    limit.as_secs_f64()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn advance(&self, progress: u8, step: TaskStep) -> StepResult<()> {
        self.ctx
            .registry
            .update(self.task_id, |t| t.advance(progress, step))?;
        Ok(())
    }

    /// Stored components to reuse for a composite that did not ask for them.
    async fn load_reusable(&self) -> EcoResult<BTreeMap<IndexKind, Component>> {
        let mut reused = BTreeMap::new();
        if !self.job.requested.contains(&IndexKind::Rsei) {
            return Ok(reused);
        }

        let image = &self.job.image;
        let retry = &self.ctx.config.retry;
        for kind in IndexKind::RSEI_COMPONENTS {
            if self.job.requested.contains(&kind) {
                continue;
            }
            let found = retry
                .run("find stored result", || {
                    self.ctx.deps.store.latest_result(image.id, kind, &self.parameters)
                })
                .await?;
            let Some(stored) = found else { continue };

            let bytes = retry
                .run("read stored grid", || self.ctx.deps.blobs.get(&stored.data_key))
                .await?;
            let grid = decode_index_geotiff(&bytes)?;
            if grid.shape() != image.shape() {
                warn!(
                    result_id = %stored.id,
                    kind = %kind,
                    "Stored grid does not match the image shape, recomputing"
                );
                continue;
            }

            info!(result_id = %stored.id, kind = %kind, "Reusing stored component");
            reused.insert(
                kind,
                Component {
                    grid: Arc::new(grid),
                    result_id: stored.id,
                },
            );
        }
        Ok(reused)
    }

    async fn open_source(&self) -> EcoResult<Box<dyn RasterSource>> {
        let opener = self.ctx.deps.opener.clone();
        let image = self.job.image.clone();
        let retry = self.ctx.config.retry;
        let source = blocking(move || retry.run_blocking("open raster", || opener.open(&image)))
            .await?;
        if source.shape() != self.job.image.shape() {
            return Err(EcoError::shape_mismatch(self.job.image.shape(), source.shape()));
        }
        Ok(source)
    }

    /// Compute one index window by window, reading only the bands it needs.
    #[instrument(skip(self, source), fields(task_id = %self.task_id, kind = %kind))]
    async fn compute(
        &self,
        kind: IndexKind,
        mut source: Box<dyn RasterSource>,
    ) -> EcoResult<(Box<dyn RasterSource>, IndexOutput)> {
        let config = self.ctx.config.index;
        let infos: Vec<BandInfo> = required_roles(kind, &config)
            .into_iter()
            .map(|role| {
                self.job
                    .image
                    .band(role)
                    .cloned()
                    .ok_or_else(|| EcoError::MissingBand(role.to_string()))
            })
            .collect::<EcoResult<_>>()?;
        let tile_rows = self.ctx.config.tile_rows;
        let retry = self.ctx.config.retry;

        let started = Instant::now();
        let result = blocking(move || {
            let (width, height) = source.shape();
            let mut output = IndexOutput::empty(width, height);
            for window in RasterWindow::row_bands(width, height, tile_rows) {
                let bands = retry.run_blocking("read bands", || source.read_bands(&infos, window))?;
                let set = BandSet::new(bands)?;
                output.merge_tile(&window, kind.compute(&set, &config)?)?;
            }
            Ok((source, output))
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("eco_index_compute_seconds", "kind" => kind.as_str()).record(elapsed);
        if let Ok((_, output)) = &result {
            debug!(
                valid = output.grid.valid_count(),
                elapsed_ms = (elapsed * 1000.0) as u64,
                "Computed index"
            );
        }
        result
    }

    async fn synthesize_rsei(
        &self,
        components: &BTreeMap<IndexKind, Component>,
    ) -> EcoResult<(IndexGrid, CompositeProvenance, Vec<QualityWarning>)> {
        let component = |kind: IndexKind| {
            components
                .get(&kind)
                .ok_or_else(|| EcoError::InternalError(format!("{} was not computed", kind)))
        };
        let greenness = component(IndexKind::Greenness)?;
        let wetness = component(IndexKind::Wetness)?;
        let dryness = component(IndexKind::Dryness)?;
        let heat = component(IndexKind::Heat)?;
        let grids = [
            greenness.grid.clone(),
            wetness.grid.clone(),
            dryness.grid.clone(),
            heat.grid.clone(),
        ];
        let config = self.ctx.config.index.rsei;

        let output = blocking(move || {
            let [g, w, d, h] = &grids;
            synthesize(
                &RseiComponents {
                    greenness: g.as_ref(),
                    wetness: w.as_ref(),
                    dryness: d.as_ref(),
                    heat: h.as_ref(),
                },
                &config,
            )
        })
        .await?;

        info!(
            task_id = %self.task_id,
            pc1_ratio = output.explained_variance.first().copied().unwrap_or(0.0),
            "Synthesized RSEI"
        );
        let provenance = CompositeProvenance {
            greenness_id: greenness.result_id,
            wetness_id: wetness.result_id,
            dryness_id: dryness.result_id,
            heat_id: heat.result_id,
            explained_variance: output.explained_variance,
            loadings: output.loadings,
        };
        Ok((output.grid, provenance, output.warnings))
    }

    /// Statistics, preview and GeoTIFF encoding of one output.
    async fn prepare(
        &self,
        kind: IndexKind,
        grid: &Arc<IndexGrid>,
        warnings: Vec<QualityWarning>,
    ) -> EcoResult<Prepared> {
        let image = &self.job.image;
        let fallback_m = self
            .ctx
            .config
            .fallback_pixel_m
            .unwrap_or_else(|| image.sensor.nominal_resolution_m());
        let pixel_area = image.pixel_area_km2(fallback_m);
        let geo = image.geo_transform.map(|transform| GeoReference {
            transform,
            epsg: image.crs.as_deref().and_then(epsg_code),
        });
        let render = self.ctx.config.render;
        let grid = grid.clone();

        let (statistics, preview, geotiff) = blocking(move || {
            let statistics = summarize(&grid, pixel_area);
            let preview = render_preview(kind, &grid, statistics.as_ref(), &render)?;
            let geotiff = encode_index_geotiff(&grid, geo.as_ref())?;
            Ok((statistics, preview, geotiff))
        })
        .await?;

        let mut result = IndexResult::new(image.id, self.task_id, kind, image.shape());
        result.statistics = statistics;
        result.warnings = warnings;
        result.data_key = ResultPaths::grid(image.id, result.id, kind);
        result.visualization_key = preview
            .as_ref()
            .map(|_| ResultPaths::preview(image.id, result.id, kind));
        result.parameter_signature = self.parameters.clone();

        Ok(Prepared {
            result,
            geotiff,
            preview: preview.map(|p| p.png),
        })
    }

    #[instrument(skip(self, item), fields(task_id = %self.task_id, kind = %item.result.kind))]
    async fn persist(&self, item: Prepared) -> EcoResult<()> {
        let retry = &self.ctx.config.retry;
        let blobs = &self.ctx.deps.blobs;

        let geotiff = Bytes::from(item.geotiff);
        retry
            .run("write grid", || blobs.put(&item.result.data_key, geotiff.clone()))
            .await?;
        if let (Some(key), Some(png)) = (&item.result.visualization_key, item.preview) {
            let png = Bytes::from(png);
            retry
                .run("write preview", || blobs.put(key, png.clone()))
                .await?;
        }
        retry
            .run("insert result", || {
                self.ctx.deps.store.insert_result(&item.result)
            })
            .await?;

        let result_id = item.result.id;
        self.ctx
            .registry
            .update(self.task_id, |t| t.record_result(result_id))?;
        self.ctx.persist_snapshot(self.task_id).await?;
        info!(result_id = %result_id, "Persisted result");
        Ok(())
    }
}

/// Progress layout for `n` produced kinds, each taking three steps
/// (compute or synthesize, summarize, persist) within 5..99.
struct Stages {
    n: usize,
}

impl Stages {
    fn new(n: usize) -> Self {
        Self { n }
    }

    fn at(&self, i: usize, step: usize) -> u8 {
        span(5, 99, 3 * i + step, 3 * self.n)
    }
}

/// Progress at item `i` of `n` within `[from, to)`.
fn span(from: u8, to: u8, i: usize, n: usize) -> u8 {
    if n == 0 {
        return from;
    }
    from + ((to - from) as usize * i / n) as u8
}

/// Run CPU-bound or blocking work off the async workers.
async fn blocking<T, F>(f: F) -> EcoResult<T>
where
    F: FnOnce() -> EcoResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EcoError::InternalError(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_partitions_range() {
        assert_eq!(span(5, 60, 0, 4), 5);
        assert_eq!(span(5, 60, 1, 4), 18);
        assert_eq!(span(5, 60, 3, 4), 46);
        assert_eq!(span(85, 99, 0, 0), 85);
    }

    #[test]
    fn test_stages_are_monotonic() {
        let stages = Stages::new(5);
        let progress: Vec<u8> = (0..5)
            .flat_map(|i| (0..3).map(move |step| (i, step)))
            .map(|(i, step)| stages.at(i, step))
            .collect();
        assert_eq!(progress.first(), Some(&5));
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "{:?}", progress);
        assert!(progress.iter().all(|p| *p < 99));
    }
}
