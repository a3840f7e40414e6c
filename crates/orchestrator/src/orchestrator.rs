//! Bounded task queue and fixed worker pool.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use eco_common::{EcoError, EcoResult, IndexKind, IndexResult, ProcessingTask, TaskStatus};
use eco_indices::required_roles;
use raster_io::RasterOpener;
use storage::{BlobStore, ResultStore};

use crate::config::OrchestratorConfig;
use crate::pipeline::{Interrupt, Pipeline};
use crate::registry::{Job, TaskRegistry};
use crate::request::{task_signature, ComputeRequest, Submission};

/// Backends the engine reads rasters from and writes results to.
#[derive(Clone)]
pub struct EngineDeps {
    pub opener: Arc<dyn RasterOpener>,
    pub store: Arc<dyn ResultStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl EngineDeps {
    pub fn new(
        opener: Arc<dyn RasterOpener>,
        store: Arc<dyn ResultStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            opener,
            store,
            blobs,
        }
    }
}

/// State shared by the orchestrator and its workers.
pub(crate) struct WorkerContext {
    pub config: Arc<OrchestratorConfig>,
    pub deps: EngineDeps,
    pub registry: Arc<TaskRegistry>,
}

impl WorkerContext {
    /// Write the current snapshot of a task to the store.
    pub async fn persist_snapshot(&self, task_id: Uuid) -> EcoResult<()> {
        let Some(task) = self.registry.snapshot(task_id) else {
            return Err(EcoError::TaskNotFound(task_id.to_string()));
        };
        self.config
            .retry
            .run("persist task", || self.deps.store.put_task(&task))
            .await
    }

    async fn persist_snapshot_logged(&self, task_id: Uuid) {
        if let Err(e) = self.persist_snapshot(task_id).await {
            error!(task_id = %task_id, error = %e, "Failed to persist task snapshot");
        }
    }

    async fn run_task(&self, task_id: Uuid) {
        let Some(job) = self.registry.take_job(task_id) else {
            debug!(task_id = %task_id, "Task no longer pending, skipping");
            return;
        };
        if let Err(e) = self.registry.update(task_id, |t| t.start()) {
            debug!(task_id = %task_id, error = %e, "Task could not start");
            return;
        }
        self.persist_snapshot_logged(task_id).await;

        info!(
            task_id = %task_id,
            image = %job.image.name,
            kinds = ?job.requested,
            "Processing task"
        );
        let start = Instant::now();
        let outcome = Pipeline::new(self, task_id, job).run().await;

        let finished = match outcome {
            Ok(()) => self.registry.update(task_id, |t| t.complete()),
            Err(Interrupt::Cancelled) => self.registry.update(task_id, |t| t.cancel()),
            Err(Interrupt::Failed(e)) => {
                error!(
                    task_id = %task_id,
                    error = %e,
                    error_kind = %e.kind(),
                    "Task failed"
                );
                self.registry.update(task_id, |t| t.fail(&e))
            }
        };

        match finished {
            Ok(task) => {
                metrics::counter!("eco_tasks_finished_total", "status" => task.status.as_str())
                    .increment(1);
                info!(
                    task_id = %task_id,
                    status = %task.status,
                    results = task.result_ids.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task finished"
                );
            }
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to finish task"),
        }
        self.persist_snapshot_logged(task_id).await;
    }
}

/// Accepts compute requests and runs them on a fixed pool of workers.
///
/// Task ids travel over a bounded channel; each id is received by exactly
/// one worker. `submit` waits while the queue is full.
pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    sender: mpsc::Sender<Uuid>,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawn the worker pool. Must be called within a tokio runtime.
    pub fn start(config: OrchestratorConfig, deps: EngineDeps) -> EcoResult<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let workers_count = config.workers;
        let ctx = Arc::new(WorkerContext {
            config: Arc::new(config),
            deps,
            registry: Arc::new(TaskRegistry::default()),
        });

        let workers = (0..workers_count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let receiver = receiver.clone();
                tokio::spawn(worker_loop(worker_id, ctx, receiver))
            })
            .collect();

        info!(
            workers = workers_count,
            queue_capacity = ctx.config.queue_capacity,
            tile_rows = ctx.config.tile_rows,
            "Orchestrator started"
        );
        Ok(Self {
            ctx,
            sender,
            workers,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.ctx.config
    }

    /// Validate a request and queue it, or join an identical active task.
    ///
    /// Nothing is registered or persisted when validation fails.
    pub async fn submit(&self, request: ComputeRequest) -> EcoResult<Submission> {
        let ComputeRequest {
            image,
            indices,
            deadline,
        } = request;
        let config = &self.ctx.config;

        image.validate_roles()?;
        if image.width == 0 || image.height == 0 {
            return Err(EcoError::invalid_parameter(
                "shape",
                format!("image '{}' is {}x{}", image.name, image.width, image.height),
            ));
        }
        let expanded = indices.expanded();
        for kind in expanded.iter().filter(|k| **k != IndexKind::Rsei) {
            image.require_roles(&required_roles(*kind, &config.index))?;
        }
        self.ctx.deps.opener.check(&image)?;

        let requested: Vec<IndexKind> = indices.kinds().collect();
        let signature = task_signature(image.id, &requested, &config.index.signature());
        let task = ProcessingTask::new(image.id, requested.clone(), signature);
        let job = Job {
            image,
            requested,
            deadline,
        };

        let (task, coalesced) = self.ctx.registry.register(task, job);
        if coalesced {
            metrics::counter!("eco_tasks_coalesced_total").increment(1);
            info!(task_id = %task.id, "Joined identical active task");
            return Ok(Submission {
                task_id: task.id,
                coalesced: true,
            });
        }

        if let Err(e) = self.ctx.persist_snapshot(task.id).await {
            self.ctx.registry.discard(task.id);
            return Err(e);
        }
        if self.sender.send(task.id).await.is_err() {
            self.ctx.registry.discard(task.id);
            return Err(EcoError::InternalError("task queue is closed".to_string()));
        }

        metrics::counter!("eco_tasks_submitted_total").increment(1);
        info!(
            task_id = %task.id,
            image_id = %task.image_id,
            kinds = ?task.kinds,
            "Task submitted"
        );
        Ok(Submission {
            task_id: task.id,
            coalesced: false,
        })
    }

    /// Current snapshot: the live registry first, then the store.
    pub async fn status(&self, task_id: Uuid) -> EcoResult<ProcessingTask> {
        if let Some(task) = self.ctx.registry.snapshot(task_id) {
            return Ok(task);
        }
        self.ctx
            .deps
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EcoError::TaskNotFound(task_id.to_string()))
    }

    /// Cancel a task. Pending tasks are cancelled at once; running tasks
    /// stop at the next step boundary.
    pub async fn cancel(&self, task_id: Uuid) -> EcoResult<ProcessingTask> {
        match self.ctx.registry.request_cancel(task_id) {
            Ok(task) => {
                if task.status == TaskStatus::Cancelled {
                    metrics::counter!("eco_tasks_finished_total", "status" => task.status.as_str())
                        .increment(1);
                    self.ctx.persist_snapshot(task_id).await?;
                }
                info!(task_id = %task_id, status = %task.status, "Cancellation requested");
                Ok(task)
            }
            Err(EcoError::TaskNotFound(_)) => {
                // Known only to the store, e.g. queued by an earlier process.
                let mut task = self
                    .ctx
                    .deps
                    .store
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| EcoError::TaskNotFound(task_id.to_string()))?;
                task.cancel()?;
                self.ctx.deps.store.put_task(&task).await?;
                Ok(task)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve once the task reaches a terminal state.
    pub async fn wait(&self, task_id: Uuid) -> EcoResult<ProcessingTask> {
        let Some(mut rx) = self.ctx.registry.subscribe(task_id) else {
            return self.status(task_id).await;
        };
        let task = rx
            .wait_for(|t| t.is_terminal())
            .await
            .map_err(|_| EcoError::InternalError(format!("task {} was dropped", task_id)))?
            .clone();
        Ok(task)
    }

    /// Results written by a task.
    pub async fn results(&self, task_id: Uuid) -> EcoResult<Vec<IndexResult>> {
        self.ctx.deps.store.results_for_task(task_id).await
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(self) {
        let Orchestrator { sender, workers, .. } = self;
        drop(sender);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker panicked");
            }
        }
        info!("Orchestrator stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
) {
    debug!(worker_id = worker_id, "Worker started");
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task_id) = next else { break };
        ctx.run_task(task_id).await;
    }
    debug!(worker_id = worker_id, "Worker stopped");
}
