//! Live task registry.
//!
//! Every snapshot change happens under one lock, so readers see progress and
//! step together. Terminal snapshots stay in the registry for `status` and
//! `wait` after the task finishes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use eco_common::{EcoError, EcoResult, IndexKind, ProcessingTask, RasterImage, TaskStatus};

/// Work a worker needs to run a task.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub image: RasterImage,
    pub requested: Vec<IndexKind>,
    pub deadline: Option<Duration>,
}

struct Entry {
    task: ProcessingTask,
    job: Option<Job>,
    cancel_requested: bool,
    watch: watch::Sender<ProcessingTask>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, Entry>,
    /// Signature to id of the pending or running task carrying it
    active: HashMap<String, Uuid>,
}

#[derive(Default)]
pub(crate) struct TaskRegistry {
    inner: Mutex<Inner>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task, or return the active task with the same signature.
    ///
    /// The flag is `true` when the request was coalesced.
    pub fn register(&self, task: ProcessingTask, job: Job) -> (ProcessingTask, bool) {
        let mut inner = self.lock();
        if let Some(existing) = inner.active.get(&task.signature) {
            if let Some(entry) = inner.entries.get(existing) {
                return (entry.task.clone(), true);
            }
        }

        let (tx, _) = watch::channel(task.clone());
        inner.active.insert(task.signature.clone(), task.id);
        inner.entries.insert(
            task.id,
            Entry {
                task: task.clone(),
                job: Some(job),
                cancel_requested: false,
                watch: tx,
            },
        );
        (task, false)
    }

    /// Forget a task that never reached the queue.
    pub fn discard(&self, task_id: Uuid) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.remove(&task_id) {
            inner.active.remove(&entry.task.signature);
        }
    }

    pub fn snapshot(&self, task_id: Uuid) -> Option<ProcessingTask> {
        self.lock().entries.get(&task_id).map(|e| e.task.clone())
    }

    pub fn subscribe(&self, task_id: Uuid) -> Option<watch::Receiver<ProcessingTask>> {
        self.lock().entries.get(&task_id).map(|e| e.watch.subscribe())
    }

    pub fn take_job(&self, task_id: Uuid) -> Option<Job> {
        self.lock()
            .entries
            .get_mut(&task_id)
            .and_then(|e| e.job.take())
    }

    pub fn cancel_requested(&self, task_id: Uuid) -> bool {
        self.lock()
            .entries
            .get(&task_id)
            .map(|e| e.cancel_requested)
            .unwrap_or(false)
    }

    /// Apply a transition and publish the new snapshot.
    pub fn update<F>(&self, task_id: Uuid, f: F) -> EcoResult<ProcessingTask>
    where
        F: FnOnce(&mut ProcessingTask) -> EcoResult<()>,
    {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&task_id)
            .ok_or_else(|| EcoError::TaskNotFound(task_id.to_string()))?;
        f(&mut entry.task)?;

        let snapshot = entry.task.clone();
        entry.watch.send_replace(snapshot.clone());
        if snapshot.is_terminal() {
            entry.job = None;
            if inner.active.get(&snapshot.signature) == Some(&task_id) {
                inner.active.remove(&snapshot.signature);
            }
        }
        Ok(snapshot)
    }

    /// Cancel a pending task at once, or flag a running one for the worker.
    pub fn request_cancel(&self, task_id: Uuid) -> EcoResult<ProcessingTask> {
        {
            let mut inner = self.lock();
            let entry = inner
                .entries
                .get_mut(&task_id)
                .ok_or_else(|| EcoError::TaskNotFound(task_id.to_string()))?;
            if entry.task.status == TaskStatus::Running {
                entry.cancel_requested = true;
                return Ok(entry.task.clone());
            }
        }
        self.update(task_id, |t| t.cancel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eco_common::TaskStep;

    fn job() -> Job {
        Job {
            image: RasterImage::new("scene.tif", 2, 2, Vec::new()),
            requested: vec![IndexKind::Ndvi],
            deadline: None,
        }
    }

    fn task(signature: &str) -> ProcessingTask {
        ProcessingTask::new(Uuid::new_v4(), vec![IndexKind::Ndvi], signature)
    }

    #[test]
    fn test_identical_signature_coalesces_until_terminal() {
        let registry = TaskRegistry::default();
        let first = task("sig");
        let (_, coalesced) = registry.register(first.clone(), job());
        assert!(!coalesced);

        let (joined, coalesced) = registry.register(task("sig"), job());
        assert!(coalesced);
        assert_eq!(joined.id, first.id);

        registry.update(first.id, |t| t.start()).unwrap();
        registry.update(first.id, |t| t.complete()).unwrap();
        let (fresh, coalesced) = registry.register(task("sig"), job());
        assert!(!coalesced);
        assert_ne!(fresh.id, first.id);
    }

    #[test]
    fn test_pending_cancel_is_immediate() {
        let registry = TaskRegistry::default();
        let t = task("a");
        registry.register(t.clone(), job());
        let snapshot = registry.request_cancel(t.id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(registry.take_job(t.id).is_none());
        assert!(registry.update(t.id, |t| t.start()).is_err());
    }

    #[test]
    fn test_running_cancel_is_flagged() {
        let registry = TaskRegistry::default();
        let t = task("a");
        registry.register(t.clone(), job());
        registry.update(t.id, |t| t.start()).unwrap();

        let snapshot = registry.request_cancel(t.id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert!(registry.cancel_requested(t.id));
    }

    #[test]
    fn test_watchers_see_updates() {
        let registry = TaskRegistry::default();
        let t = task("a");
        registry.register(t.clone(), job());
        let rx = registry.subscribe(t.id).unwrap();
        registry.update(t.id, |t| t.start()).unwrap();
        registry
            .update(t.id, |t| t.advance(30, TaskStep::Computing(IndexKind::Ndvi)))
            .unwrap();
        let seen = rx.borrow().clone();
        assert_eq!(seen.progress, 30);
        assert_eq!(seen.current_step, "computing ndvi");
    }

    #[test]
    fn test_discard_frees_signature() {
        let registry = TaskRegistry::default();
        let t = task("a");
        registry.register(t.clone(), job());
        registry.discard(t.id);
        assert!(registry.snapshot(t.id).is_none());
        assert!(!registry.register(task("a"), job()).1);
    }
}
