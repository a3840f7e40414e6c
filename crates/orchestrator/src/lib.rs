//! Task orchestration for ecological index computation.
//!
//! An [`Orchestrator`] validates [`ComputeRequest`]s, queues them on a
//! bounded channel and runs them on a fixed pool of tokio workers. Each task
//! moves through `pending -> running -> {completed | failed | cancelled}`;
//! while running, its progress and current step are published together.
//!
//! ```ignore
//! let orchestrator = Orchestrator::start(config, deps)?;
//! let submission = orchestrator.submit(ComputeRequest::new(image, indices)).await?;
//! let task = orchestrator.wait(submission.task_id).await?;
//! ```

pub mod config;
pub mod orchestrator;
mod pipeline;
mod registry;
pub mod request;
pub mod retry;

pub use config::OrchestratorConfig;
pub use orchestrator::{EngineDeps, Orchestrator};
pub use request::{task_signature, ComputeRequest, Submission};
pub use retry::RetryConfig;
