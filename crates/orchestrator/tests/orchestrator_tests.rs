//! End-to-end task processing against in-memory backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eco_common::{
    BandRole, EcoError, EcoResult, ErrorKind, IndexKind, IndexRequest, ProcessingTask,
    RasterImage, TaskStatus,
};
use eco_indices::ThermalUnits;
use orchestrator::{ComputeRequest, EngineDeps, Orchestrator, OrchestratorConfig, RetryConfig};
use raster_io::{decode_index_geotiff, MemoryOpener, MemoryRaster, RasterOpener, RasterSource};
use storage::{BlobStore, MemoryResultStore, ObjectStorage, ResultStore};
use test_utils::{poll_until, SyntheticScene};
use uuid::Uuid;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryResultStore>,
    blobs: Arc<ObjectStorage>,
}

fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        workers: 2,
        tile_rows: 4,
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        ..Default::default()
    };
    config.index.heat.units = ThermalUnits::Kelvin;
    config
}

fn harness(opener: Arc<dyn RasterOpener>) -> Harness {
    harness_with(opener, config())
}

fn harness_with(opener: Arc<dyn RasterOpener>, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryResultStore::new());
    let blobs = Arc::new(ObjectStorage::memory());
    let deps = EngineDeps::new(opener, store.clone(), blobs.clone());
    Harness {
        orchestrator: Orchestrator::start(config, deps).unwrap(),
        store,
        blobs,
    }
}

fn raster(scene: &SyntheticScene, roles: &[BandRole]) -> MemoryRaster {
    let mut raster = MemoryRaster::new(scene.width, scene.height);
    for &role in roles {
        raster = raster.with_band(role, scene.band(role));
    }
    match scene.nodata() {
        Some(nd) => raster.with_no_data(nd as f64),
        None => raster,
    }
}

/// A registered in-memory image with every band role.
fn scene_image(opener: &mut MemoryOpener) -> RasterImage {
    let scene = SyntheticScene::new(30, 12).with_nodata_border(1, 0.0);
    let raster = raster(&scene, &BandRole::ALL);
    let image = raster.to_image("scene.tif");
    opener.insert(image.id, raster);
    image
}

fn request(image: &RasterImage, kinds: &[&str]) -> ComputeRequest {
    ComputeRequest::new(image.clone(), IndexRequest::parse(kinds).unwrap())
}

async fn wait_until<F>(orchestrator: &Orchestrator, task_id: Uuid, done: F) -> ProcessingTask
where
    F: Fn(&ProcessingTask) -> bool,
{
    let done = &done;
    let reached = poll_until(2000, Duration::from_millis(5), || async move {
        let task = orchestrator.status(task_id).await.unwrap();
        done(&task).then_some(task)
    })
    .await;
    reached.unwrap_or_else(|| panic!("task {} did not reach the expected state", task_id))
}

/// Blocks `open` until the test releases it.
struct GatedOpener {
    inner: MemoryOpener,
    gate: Mutex<std_mpsc::Receiver<()>>,
    arrived: AtomicUsize,
}

impl GatedOpener {
    fn new(inner: MemoryOpener) -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let opener = Self {
            inner,
            gate: Mutex::new(rx),
            arrived: AtomicUsize::new(0),
        };
        (opener, tx)
    }
}

impl RasterOpener for GatedOpener {
    fn check(&self, image: &RasterImage) -> EcoResult<()> {
        self.inner.check(image)
    }

    fn open(&self, image: &RasterImage) -> EcoResult<Box<dyn RasterSource>> {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        // A dropped sender opens the gate for good
        let _ = self.gate.lock().unwrap().recv();
        self.inner.open(image)
    }
}

/// Fails every `open` with the same error.
struct FailingOpener {
    error: EcoError,
    calls: AtomicUsize,
}

impl RasterOpener for FailingOpener {
    fn check(&self, _image: &RasterImage) -> EcoResult<()> {
        Ok(())
    }

    fn open(&self, _image: &RasterImage) -> EcoResult<Box<dyn RasterSource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_rsei_task_completes_and_persists() {
    let mut opener = MemoryOpener::new();
    let image = scene_image(&mut opener);
    let h = harness(Arc::new(opener));

    let submission = h.orchestrator.submit(request(&image, &["rsei"])).await.unwrap();
    assert!(!submission.coalesced);
    let task = h.orchestrator.wait(submission.task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(task.current_step, "done");
    assert!(task.error_message.is_none());
    assert_eq!(task.result_ids.len(), 5);

    let results = h.orchestrator.results(task.id).await.unwrap();
    assert_eq!(results.len(), 5);
    let rsei = results.iter().find(|r| r.kind == IndexKind::Rsei).unwrap();
    let provenance = rsei.composite.as_ref().unwrap();
    for (kind, id) in IndexKind::RSEI_COMPONENTS
        .iter()
        .zip(provenance.component_ids())
    {
        let component = results.iter().find(|r| r.id == id).unwrap();
        assert_eq!(component.kind, *kind);
    }
    assert_eq!(provenance.explained_variance.len(), 4);

    let stats = rsei.statistics.as_ref().unwrap();
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.max, 1.0);
    assert_eq!(stats.valid_pixels, 28 * 10);
    assert_eq!(
        rsei.data_key,
        format!("indices/{}/{}/rsei.tif", image.id, rsei.id)
    );

    // One GeoTIFF and one preview per result
    let keys = h.blobs.list(&format!("indices/{}/", image.id)).await.unwrap();
    assert_eq!(keys.len(), 10);
    let grid = decode_index_geotiff(&h.blobs.get(&rsei.data_key).await.unwrap()).unwrap();
    assert_eq!(grid.shape(), (30, 12));
    assert_eq!(grid.valid_count(), 28 * 10);

    h.orchestrator.shutdown().await;
    let stored = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result_ids, task.result_ids);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let mut opener = MemoryOpener::new();
    let image = scene_image(&mut opener);
    let h = harness(Arc::new(opener));

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi", "ndwi", "ndbi", "rsei"]))
        .await
        .unwrap()
        .task_id;

    let mut seen = Vec::new();
    loop {
        let task = h.orchestrator.status(task_id).await.unwrap();
        seen.push(task.progress);
        if task.is_terminal() {
            assert_eq!(task.status, TaskStatus::Completed);
            break;
        }
        assert!(task.progress < 100);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.last(), Some(&100));

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_stored_components_are_reused() {
    let mut opener = MemoryOpener::new();
    let image = scene_image(&mut opener);
    let h = harness(Arc::new(opener));

    let first = h
        .orchestrator
        .submit(request(&image, &["greenness", "wetness", "dryness", "heat"]))
        .await
        .unwrap();
    let first = h.orchestrator.wait(first.task_id).await.unwrap();
    assert_eq!(first.result_ids.len(), 4);

    let second = h.orchestrator.submit(request(&image, &["rsei"])).await.unwrap();
    assert!(!second.coalesced);
    let second = h.orchestrator.wait(second.task_id).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.result_ids.len(), 1);

    let rsei = h.store.get_result(second.result_ids[0]).await.unwrap().unwrap();
    let reused = rsei.composite.unwrap().component_ids();
    for id in reused {
        assert!(first.result_ids.contains(&id));
    }
    assert_eq!(h.store.result_count().await, 5);

    h.orchestrator.shutdown().await;
}

// ============================================================================
// Preconditions
// ============================================================================

#[tokio::test]
async fn test_rsei_without_thermal_is_rejected_before_task_creation() {
    let scene = SyntheticScene::new(12, 6);
    let raster = raster(&scene, &BandRole::OPTICAL);
    let image = raster.to_image("optical.tif");
    let mut opener = MemoryOpener::new();
    opener.insert(image.id, raster);
    let h = harness(Arc::new(opener));

    let err = h
        .orchestrator
        .submit(request(&image, &["rsei"]))
        .await
        .unwrap_err();
    assert_eq!(err, EcoError::MissingBand("thermal".to_string()));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(h.store.task_count().await, 0);
    assert_eq!(h.store.result_count().await, 0);

    // The optical indices are still fine
    let ok = h.orchestrator.submit(request(&image, &["ndvi"])).await.unwrap();
    let task = h.orchestrator.wait(ok.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_source_is_rejected() {
    let scene = SyntheticScene::new(4, 4);
    let image = raster(&scene, &BandRole::ALL).to_image("scene.tif");
    // Never registered with the opener
    let h = harness(Arc::new(MemoryOpener::new()));

    let err = h
        .orchestrator
        .submit(request(&image, &["ndvi"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EcoError::UnsupportedFormat(_)));
    assert_eq!(h.store.task_count().await, 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_roles_are_rejected() {
    let mut opener = MemoryOpener::new();
    let mut image = scene_image(&mut opener);
    let red = image.bands[0].clone();
    image.bands.push(red);
    let h = harness(Arc::new(opener));

    let err = h
        .orchestrator
        .submit(request(&image, &["ndvi"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EcoError::DuplicateBand(_)));

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_task() {
    let h = harness(Arc::new(MemoryOpener::new()));
    let id = Uuid::new_v4();
    assert!(matches!(
        h.orchestrator.status(id).await,
        Err(EcoError::TaskNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.cancel(id).await,
        Err(EcoError::TaskNotFound(_))
    ));
    h.orchestrator.shutdown().await;
}

// ============================================================================
// Cancellation and coalescing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_after_loading_persists_nothing() {
    let mut inner = MemoryOpener::new();
    let image = scene_image(&mut inner);
    let (opener, gate) = GatedOpener::new(inner);
    let h = harness(Arc::new(opener));

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi", "rsei"]))
        .await
        .unwrap()
        .task_id;
    let running = wait_until(&h.orchestrator, task_id, |t| t.status == TaskStatus::Running).await;
    assert_eq!(running.current_step, "loading");

    let flagged = h.orchestrator.cancel(task_id).await.unwrap();
    assert_eq!(flagged.status, TaskStatus::Running);
    drop(gate);

    let task = h.orchestrator.wait(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result_ids.is_empty());
    assert!(task.progress < 100);
    assert!(task.error_message.is_none());
    assert_eq!(h.store.result_count().await, 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_requests_coalesce() {
    let mut inner = MemoryOpener::new();
    let image = scene_image(&mut inner);
    let (opener, gate) = GatedOpener::new(inner);
    let h = harness(Arc::new(opener));

    let first = h.orchestrator.submit(request(&image, &["ndvi"])).await.unwrap();
    let second = h.orchestrator.submit(request(&image, &["ndvi"])).await.unwrap();
    assert!(!first.coalesced);
    assert!(second.coalesced);
    assert_eq!(first.task_id, second.task_id);

    gate.send(()).unwrap();
    let task = h.orchestrator.wait(first.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let again = h.orchestrator.status(second.task_id).await.unwrap();
    assert_eq!(again.result_ids, task.result_ids);
    assert_eq!(h.store.result_count().await, 1);
    assert_eq!(h.store.task_count().await, 1);

    // Finished tasks are never joined
    drop(gate);
    let third = h.orchestrator.submit(request(&image, &["ndvi"])).await.unwrap();
    assert!(!third.coalesced);
    assert_ne!(third.task_id, first.task_id);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_differing_only_in_components_do_not_coalesce() {
    let mut inner = MemoryOpener::new();
    let image = scene_image(&mut inner);
    let (opener, gate) = GatedOpener::new(inner);
    let opener = Arc::new(opener);
    let h = harness(opener.clone());

    let stored = h.orchestrator.submit(request(&image, &["heat"])).await.unwrap();
    gate.send(()).unwrap();
    let stored = h.orchestrator.wait(stored.task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    let stored_heat = stored.result_ids[0];

    // Both expand to the same work, but only the second asked for heat
    let rsei_only = h.orchestrator.submit(request(&image, &["rsei"])).await.unwrap();
    let with_heat = h
        .orchestrator
        .submit(request(&image, &["heat", "rsei"]))
        .await
        .unwrap();
    assert!(!rsei_only.coalesced);
    assert!(!with_heat.coalesced);
    assert_ne!(rsei_only.task_id, with_heat.task_id);

    // Both have looked up stored components by the time they open the raster
    let arrived = &opener.arrived;
    let opened = poll_until(2000, Duration::from_millis(5), || async move {
        (arrived.load(Ordering::SeqCst) == 3).then_some(())
    })
    .await;
    assert!(opened.is_some());
    drop(gate);
    let rsei_only = h.orchestrator.wait(rsei_only.task_id).await.unwrap();
    let with_heat = h.orchestrator.wait(with_heat.task_id).await.unwrap();
    assert_eq!(rsei_only.status, TaskStatus::Completed);
    assert_eq!(with_heat.status, TaskStatus::Completed);

    let results = h.orchestrator.results(with_heat.id).await.unwrap();
    let heat = results.iter().find(|r| r.kind == IndexKind::Heat).unwrap();
    assert_ne!(heat.id, stored_heat);
    assert_eq!(results.len(), 5);

    let rsei = h.orchestrator.results(rsei_only.id).await.unwrap();
    let rsei = rsei.iter().find(|r| r.kind == IndexKind::Rsei).unwrap();
    assert_eq!(rsei.composite.as_ref().unwrap().heat_id, stored_heat);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_cancel_is_immediate() {
    let mut inner = MemoryOpener::new();
    let image = scene_image(&mut inner);
    let (opener, gate) = GatedOpener::new(inner);
    let h = harness_with(
        Arc::new(opener),
        OrchestratorConfig {
            workers: 1,
            ..config()
        },
    );

    // The only worker is held by the first task
    let busy = h.orchestrator.submit(request(&image, &["ndvi"])).await.unwrap();
    wait_until(&h.orchestrator, busy.task_id, |t| t.status == TaskStatus::Running).await;
    let queued = h.orchestrator.submit(request(&image, &["ndsi"])).await.unwrap();

    let cancelled = h.orchestrator.cancel(queued.task_id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.progress, 0);
    assert!(matches!(
        h.orchestrator.cancel(queued.task_id).await,
        Err(EcoError::InvalidTransition { .. })
    ));

    drop(gate);
    let busy = h.orchestrator.wait(busy.task_id).await.unwrap();
    assert_eq!(busy.status, TaskStatus::Completed);
    h.orchestrator.shutdown().await;

    let stored = h.store.get_task(queued.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert!(stored.result_ids.is_empty());
    assert_eq!(h.store.result_count().await, 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failure_message_is_verbatim() {
    let opener = Arc::new(FailingOpener {
        error: EcoError::RasterDecode("unsupported predictor 3".to_string()),
        calls: AtomicUsize::new(0),
    });
    let mut scratch = MemoryOpener::new();
    let image = scene_image(&mut scratch);
    let h = harness(opener.clone());

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi"]))
        .await
        .unwrap()
        .task_id;
    let task = h.orchestrator.wait(task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("Invalid raster data: unsupported predictor 3")
    );
    assert_eq!(task.error_kind, Some(ErrorKind::Resource));
    assert!(task.progress < 100);
    // Not transient, so not retried
    assert_eq!(opener.calls.load(Ordering::SeqCst), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_transient_read_errors_are_retried() {
    let opener = Arc::new(FailingOpener {
        error: EcoError::RasterRead("connection reset".to_string()),
        calls: AtomicUsize::new(0),
    });
    let mut scratch = MemoryOpener::new();
    let image = scene_image(&mut scratch);
    let h = harness(opener.clone());

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi"]))
        .await
        .unwrap()
        .task_id;
    let task = h.orchestrator.wait(task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("Failed to read raster: connection reset")
    );
    assert_eq!(opener.calls.load(Ordering::SeqCst), 3);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_synthesis_failure_keeps_earlier_results() {
    // Every thermal sample equals the nodata value, so heat has no valid pixel
    let scene = SyntheticScene::new(30, 12).with_nodata_border(1, 0.0);
    let raster = raster(&scene, &BandRole::OPTICAL)
        .with_band(BandRole::Thermal, vec![0.0; 30 * 12])
        .with_no_data(0.0);
    let image = raster.to_image("cold.tif");
    let mut opener = MemoryOpener::new();
    opener.insert(image.id, raster);
    let h = harness(Arc::new(opener));

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi", "rsei"]))
        .await
        .unwrap()
        .task_id;
    let task = h.orchestrator.wait(task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::DataQuality));
    assert_eq!(task.current_step, "synthesizing rsei");
    assert!(task.progress < 100);
    assert_eq!(task.result_ids.len(), 5);

    let results = h.orchestrator.results(task_id).await.unwrap();
    let mut kinds: Vec<IndexKind> = results.iter().map(|r| r.kind).collect();
    kinds.sort();
    let mut expected = vec![IndexKind::Ndvi];
    expected.extend(IndexKind::RSEI_COMPONENTS);
    expected.sort();
    assert_eq!(kinds, expected);
    for result in &results {
        assert!(task.result_ids.contains(&result.id));
    }
    let heat = results.iter().find(|r| r.kind == IndexKind::Heat).unwrap();
    assert!(heat.statistics.is_none());
    assert_eq!(h.store.result_count().await, 5);

    h.orchestrator.shutdown().await;
    let stored = h.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.result_ids, task.result_ids);
}

#[tokio::test]
async fn test_deadline_exceeded_fails_with_timeout() {
    let mut opener = MemoryOpener::new();
    let image = scene_image(&mut opener);
    let h = harness(Arc::new(opener));

    let task_id = h
        .orchestrator
        .submit(request(&image, &["ndvi"]).with_deadline(Duration::ZERO))
        .await
        .unwrap()
        .task_id;
    let task = h.orchestrator.wait(task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::Timeout));
    assert!(task.result_ids.is_empty());
    assert_eq!(h.store.result_count().await, 0);

    h.orchestrator.shutdown().await;
}
