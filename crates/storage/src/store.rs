//! The result persistence port.

use async_trait::async_trait;
use uuid::Uuid;

use eco_common::{EcoResult, IndexKind, IndexResult, ProcessingTask};

/// Durable storage for task snapshots and index results.
///
/// Task snapshots are upserted on every state change. Index results are
/// insert-only: a result is never modified once written, and inserting an id
/// twice is an error.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put_task(&self, task: &ProcessingTask) -> EcoResult<()>;

    async fn get_task(&self, task_id: Uuid) -> EcoResult<Option<ProcessingTask>>;

    async fn insert_result(&self, result: &IndexResult) -> EcoResult<()>;

    async fn get_result(&self, result_id: Uuid) -> EcoResult<Option<IndexResult>>;

    /// All results of an image, oldest first.
    async fn results_for_image(&self, image_id: Uuid) -> EcoResult<Vec<IndexResult>>;

    /// All results written by a task, oldest first.
    async fn results_for_task(&self, task_id: Uuid) -> EcoResult<Vec<IndexResult>>;

    /// Most recent result of `kind` for an image computed with `signature`.
    async fn latest_result(
        &self,
        image_id: Uuid,
        kind: IndexKind,
        signature: &str,
    ) -> EcoResult<Option<IndexResult>>;
}
