//! PostgreSQL-backed result store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use eco_common::{
    CompositeProvenance, EcoError, EcoResult, ErrorKind, IndexKind, IndexResult, IndexStatistics,
    ProcessingTask, QualityWarning, TaskStatus,
};

use crate::store::ResultStore;

/// Database connection pool and catalog operations.
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    pub async fn connect(database_url: &str, max_connections: u32) -> EcoResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EcoError::DatabaseError(format!("Connection failed: {}", e)))?;

        info!(max_connections = max_connections, "Connected to catalog");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> EcoResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| EcoError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }
        Ok(())
    }

    async fn query_results(&self, sql: &str, id: Uuid) -> EcoResult<Vec<IndexResult>> {
        let rows = sqlx::query_as::<_, ResultRow>(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EcoError::DatabaseError(format!("Query failed: {}", e)))?;

        rows.into_iter().map(IndexResult::try_from).collect()
    }
}

const RESULT_COLUMNS: &str = "id, image_id, task_id, kind, width, height, statistics, warnings, \
     data_key, visualization_key, parameter_signature, composite, created_at";

#[async_trait]
impl ResultStore for Catalog {
    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status))]
    async fn put_task(&self, task: &ProcessingTask) -> EcoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_tasks (
                id, image_id, kinds, status, progress, current_step,
                error_message, error_kind, result_ids, signature,
                created_at, started_at, finished_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10,
                $11, $12, $13
            )
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                current_step = EXCLUDED.current_step,
                error_message = EXCLUDED.error_message,
                error_kind = EXCLUDED.error_kind,
                result_ids = EXCLUDED.result_ids,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(task.id)
        .bind(task.image_id)
        .bind(Json(&task.kinds))
        .bind(task.status.as_str())
        .bind(task.progress as i16)
        .bind(&task.current_step)
        .bind(&task.error_message)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(Json(&task.result_ids))
        .bind(&task.signature)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EcoError::DatabaseError(format!("Upsert task failed: {}", e)))?;

        debug!(progress = task.progress, "Stored task snapshot");
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> EcoResult<Option<ProcessingTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT id, image_id, kinds, status, progress, current_step, error_message, \
             error_kind, result_ids, signature, created_at, started_at, finished_at \
             FROM processing_tasks WHERE id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EcoError::DatabaseError(format!("Query failed: {}", e)))?;

        row.map(ProcessingTask::try_from).transpose()
    }

    #[instrument(skip(self, result), fields(result_id = %result.id, kind = %result.kind))]
    async fn insert_result(&self, result: &IndexResult) -> EcoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO index_results (
                id, image_id, task_id, kind, width, height,
                statistics, warnings, data_key, visualization_key,
                parameter_signature, composite, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10,
                $11, $12, $13
            )
            "#,
        )
        .bind(result.id)
        .bind(result.image_id)
        .bind(result.task_id)
        .bind(result.kind.as_str())
        .bind(result.width as i32)
        .bind(result.height as i32)
        .bind(result.statistics.as_ref().map(Json))
        .bind(Json(&result.warnings))
        .bind(&result.data_key)
        .bind(&result.visualization_key)
        .bind(&result.parameter_signature)
        .bind(result.composite.as_ref().map(Json))
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EcoError::DatabaseError(format!("Insert result failed: {}", e)))?;

        Ok(())
    }

    async fn get_result(&self, result_id: Uuid) -> EcoResult<Option<IndexResult>> {
        let row = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {} FROM index_results WHERE id = $1",
            RESULT_COLUMNS
        ))
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EcoError::DatabaseError(format!("Query failed: {}", e)))?;

        row.map(IndexResult::try_from).transpose()
    }

    async fn results_for_image(&self, image_id: Uuid) -> EcoResult<Vec<IndexResult>> {
        self.query_results(
            &format!(
                "SELECT {} FROM index_results WHERE image_id = $1 ORDER BY created_at ASC",
                RESULT_COLUMNS
            ),
            image_id,
        )
        .await
    }

    async fn results_for_task(&self, task_id: Uuid) -> EcoResult<Vec<IndexResult>> {
        self.query_results(
            &format!(
                "SELECT {} FROM index_results WHERE task_id = $1 ORDER BY created_at ASC",
                RESULT_COLUMNS
            ),
            task_id,
        )
        .await
    }

    async fn latest_result(
        &self,
        image_id: Uuid,
        kind: IndexKind,
        signature: &str,
    ) -> EcoResult<Option<IndexResult>> {
        let row = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {} FROM index_results \
             WHERE image_id = $1 AND kind = $2 AND parameter_signature = $3 \
             ORDER BY created_at DESC LIMIT 1",
            RESULT_COLUMNS
        ))
        .bind(image_id)
        .bind(kind.as_str())
        .bind(signature)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EcoError::DatabaseError(format!("Query failed: {}", e)))?;

        row.map(IndexResult::try_from).transpose()
    }
}

/// Internal row type for task queries.
#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    image_id: Uuid,
    kinds: Json<Vec<IndexKind>>,
    status: String,
    progress: i16,
    current_step: String,
    error_message: Option<String>,
    error_kind: Option<String>,
    result_ids: Json<Vec<Uuid>>,
    signature: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for ProcessingTask {
    type Error = EcoError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::parse(&row.status).ok_or_else(|| {
            EcoError::DatabaseError(format!("Unknown task status '{}'", row.status))
        })?;
        let error_kind = row
            .error_kind
            .as_deref()
            .map(|k| {
                ErrorKind::parse(k)
                    .ok_or_else(|| EcoError::DatabaseError(format!("Unknown error kind '{}'", k)))
            })
            .transpose()?;

        Ok(ProcessingTask {
            id: row.id,
            image_id: row.image_id,
            kinds: row.kinds.0,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            current_step: row.current_step,
            error_message: row.error_message,
            error_kind,
            result_ids: row.result_ids.0,
            signature: row.signature,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Internal row type for result queries.
#[derive(FromRow)]
struct ResultRow {
    id: Uuid,
    image_id: Uuid,
    task_id: Uuid,
    kind: String,
    width: i32,
    height: i32,
    statistics: Option<Json<IndexStatistics>>,
    warnings: Json<Vec<QualityWarning>>,
    data_key: String,
    visualization_key: Option<String>,
    parameter_signature: String,
    composite: Option<Json<CompositeProvenance>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for IndexResult {
    type Error = EcoError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let kind: IndexKind = row
            .kind
            .parse()
            .map_err(|_| EcoError::DatabaseError(format!("Unknown index kind '{}'", row.kind)))?;

        Ok(IndexResult {
            id: row.id,
            image_id: row.image_id,
            task_id: row.task_id,
            kind,
            width: row.width as usize,
            height: row.height as usize,
            statistics: row.statistics.map(|s| s.0),
            warnings: row.warnings.0,
            data_key: row.data_key,
            visualization_key: row.visualization_key,
            parameter_signature: row.parameter_signature,
            composite: row.composite.map(|c| c.0),
            created_at: row.created_at,
        })
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processing_tasks (
    id UUID PRIMARY KEY,
    image_id UUID NOT NULL,
    kinds JSONB NOT NULL,
    status VARCHAR(20) NOT NULL,
    progress SMALLINT NOT NULL DEFAULT 0,
    current_step TEXT NOT NULL,
    error_message TEXT,
    error_kind VARCHAR(20),
    result_ids JSONB NOT NULL DEFAULT '[]',
    signature TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_tasks_image ON processing_tasks(image_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON processing_tasks(status);

CREATE TABLE IF NOT EXISTS index_results (
    id UUID PRIMARY KEY,
    image_id UUID NOT NULL,
    task_id UUID NOT NULL,
    kind VARCHAR(20) NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    statistics JSONB,
    warnings JSONB NOT NULL DEFAULT '[]',
    data_key TEXT NOT NULL,
    visualization_key TEXT,
    parameter_signature TEXT NOT NULL,
    composite JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_results_image_kind ON index_results(image_id, kind, parameter_signature, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_results_task ON index_results(task_id)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements() {
        let statements: Vec<&str> = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 6);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS processing_tasks"));
    }

    #[test]
    fn test_task_row_conversion() {
        let row = TaskRow {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            kinds: Json(vec![IndexKind::Ndvi, IndexKind::Rsei]),
            status: "failed".to_string(),
            progress: 42,
            current_step: "computing ndvi".to_string(),
            error_message: Some("Missing required band: thermal".to_string()),
            error_kind: Some("precondition".to_string()),
            result_ids: Json(vec![]),
            signature: "abc".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let task = ProcessingTask::try_from(row).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_kind, Some(ErrorKind::Precondition));
        assert_eq!(task.kinds, vec![IndexKind::Ndvi, IndexKind::Rsei]);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let row = TaskRow {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            kinds: Json(vec![]),
            status: "paused".to_string(),
            progress: 0,
            current_step: String::new(),
            error_message: None,
            error_kind: None,
            result_ids: Json(vec![]),
            signature: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        assert!(matches!(
            ProcessingTask::try_from(row),
            Err(EcoError::DatabaseError(_))
        ));
    }
}
