//! In-memory result store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use eco_common::{EcoError, EcoResult, IndexKind, IndexResult, ProcessingTask};

use crate::store::ResultStore;

/// Process-local [`ResultStore`] for tests and single-shot runs.
#[derive(Default)]
pub struct MemoryResultStore {
    tasks: RwLock<HashMap<Uuid, ProcessingTask>>,
    /// Insertion order doubles as creation order
    results: RwLock<Vec<IndexResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }

    async fn filtered<F>(&self, keep: F) -> Vec<IndexResult>
    where
        F: Fn(&IndexResult) -> bool,
    {
        self.results
            .read()
            .await
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_task(&self, task: &ProcessingTask) -> EcoResult<()> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> EcoResult<Option<ProcessingTask>> {
        Ok(self.tasks.read().await.get(&task_id).cloned())
    }

    async fn insert_result(&self, result: &IndexResult) -> EcoResult<()> {
        let mut results = self.results.write().await;
        if results.iter().any(|r| r.id == result.id) {
            return Err(EcoError::InternalError(format!(
                "result {} already exists",
                result.id
            )));
        }
        results.push(result.clone());
        Ok(())
    }

    async fn get_result(&self, result_id: Uuid) -> EcoResult<Option<IndexResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .find(|r| r.id == result_id)
            .cloned())
    }

    async fn results_for_image(&self, image_id: Uuid) -> EcoResult<Vec<IndexResult>> {
        Ok(self.filtered(|r| r.image_id == image_id).await)
    }

    async fn results_for_task(&self, task_id: Uuid) -> EcoResult<Vec<IndexResult>> {
        Ok(self.filtered(|r| r.task_id == task_id).await)
    }

    async fn latest_result(
        &self,
        image_id: Uuid,
        kind: IndexKind,
        signature: &str,
    ) -> EcoResult<Option<IndexResult>> {
        Ok(self
            .filtered(|r| {
                r.image_id == image_id && r.kind == kind && r.parameter_signature == signature
            })
            .await
            .pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(image_id: Uuid, kind: IndexKind, signature: &str) -> IndexResult {
        let mut r = IndexResult::new(image_id, Uuid::new_v4(), kind, (2, 2));
        r.parameter_signature = signature.to_string();
        r
    }

    #[tokio::test]
    async fn test_results_are_insert_only() {
        let store = MemoryResultStore::new();
        let r = result(Uuid::new_v4(), IndexKind::Ndvi, "a");
        store.insert_result(&r).await.unwrap();
        assert!(store.insert_result(&r).await.is_err());
        assert_eq!(store.result_count().await, 1);
    }

    #[tokio::test]
    async fn test_latest_result_matches_signature() {
        let store = MemoryResultStore::new();
        let image = Uuid::new_v4();
        let first = result(image, IndexKind::Wetness, "a");
        let second = result(image, IndexKind::Wetness, "a");
        let other = result(image, IndexKind::Wetness, "b");
        for r in [&first, &second, &other] {
            store.insert_result(r).await.unwrap();
        }

        let latest = store
            .latest_result(image, IndexKind::Wetness, "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
        assert!(store
            .latest_result(image, IndexKind::Heat, "a")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.results_for_image(image).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_task_upsert() {
        let store = MemoryResultStore::new();
        let mut task = ProcessingTask::new(Uuid::new_v4(), vec![IndexKind::Ndvi], "sig");
        store.put_task(&task).await.unwrap();
        task.start().unwrap();
        store.put_task(&task).await.unwrap();

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, eco_common::TaskStatus::Running);
        assert_eq!(store.task_count().await, 1);
    }
}
