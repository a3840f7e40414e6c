//! Processing task lifecycle.
//!
//! ```text
//! pending -> running -> completed | failed | cancelled
//! pending -> cancelled
//! ```
//!
//! Terminal states are final. Progress never decreases and reaches 100
//! only on completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EcoError, EcoResult, ErrorKind, IndexKind};

/// Highest progress a task may report before it completes.
const MAX_RUNNING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named pipeline step, rendered into `current_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    Queued,
    Loading,
    Computing(IndexKind),
    Synthesizing,
    Summarizing(IndexKind),
    Persisting(IndexKind),
    Done,
}

impl std::fmt::Display for TaskStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStep::Queued => f.write_str("queued"),
            TaskStep::Loading => f.write_str("loading"),
            TaskStep::Computing(kind) => write!(f, "computing {}", kind),
            TaskStep::Synthesizing => f.write_str("synthesizing rsei"),
            TaskStep::Summarizing(kind) => write!(f, "summarizing {}", kind),
            TaskStep::Persisting(kind) => write!(f, "persisting {}", kind),
            TaskStep::Done => f.write_str("done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: Uuid,
    pub image_id: Uuid,
    pub kinds: Vec<IndexKind>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub result_ids: Vec<Uuid>,
    /// Identity used to coalesce identical requests
    pub signature: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingTask {
    pub fn new(image_id: Uuid, kinds: Vec<IndexKind>, signature: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_id,
            kinds,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: TaskStep::Queued.to_string(),
            error_message: None,
            error_kind: None,
            result_ids: Vec::new(),
            signature: signature.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition_error(&self, to: TaskStatus) -> EcoError {
        EcoError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// pending -> running, at the loading step.
    pub fn start(&mut self) -> EcoResult<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.progress = 0;
        self.current_step = TaskStep::Loading.to_string();
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move to a new step. Progress is clamped to stay monotonic and below 100.
    pub fn advance(&mut self, progress: u8, step: TaskStep) -> EcoResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.progress = self.progress.max(progress.min(MAX_RUNNING_PROGRESS));
        self.current_step = step.to_string();
        Ok(())
    }

    pub fn record_result(&mut self, result_id: Uuid) -> EcoResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.result_ids.push(result_id);
        Ok(())
    }

    pub fn complete(&mut self) -> EcoResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.current_step = TaskStep::Done.to_string();
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record the error verbatim; results already recorded are kept.
    pub fn fail(&mut self, error: &EcoError) -> EcoResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(error.to_string());
        self.error_kind = Some(error.kind());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> EcoResult<()> {
        if self.is_terminal() {
            return Err(self.transition_error(TaskStatus::Cancelled));
        }
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
