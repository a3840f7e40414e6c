//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use eco_common::{EcoError, EcoResult};
use eco_indices::IndexConfig;
use renderer::RenderConfig;

use crate::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker tasks consuming the queue
    pub workers: usize,
    /// Bounded queue length; submissions wait when full
    pub queue_capacity: usize,
    /// Rows per processing window
    pub tile_rows: usize,
    /// Default per-task deadline, measured from the moment a worker starts it
    pub deadline_secs: Option<u64>,
    /// Pixel edge length for area statistics when the image has no metric
    /// geotransform; the sensor's nominal resolution when unset
    pub fallback_pixel_m: Option<f64>,
    pub retry: RetryConfig,
    pub index: IndexConfig,
    pub render: RenderConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            tile_rows: 512,
            deadline_secs: None,
            fallback_pixel_m: None,
            retry: RetryConfig::default(),
            index: IndexConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> EcoResult<()> {
        if self.workers == 0 {
            return Err(EcoError::invalid_parameter("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(EcoError::invalid_parameter(
                "queue_capacity",
                "must be at least 1",
            ));
        }
        if self.tile_rows == 0 {
            return Err(EcoError::invalid_parameter("tile_rows", "must be at least 1"));
        }
        if let Some(m) = self.fallback_pixel_m {
            if !(m > 0.0) {
                return Err(EcoError::invalid_parameter(
                    "fallback_pixel_m",
                    format!("must be positive, got {}", m),
                ));
            }
        }
        self.retry.validate()?;
        self.index.validate()?;
        self.render.validate()
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: OrchestratorConfig = serde_yaml::from_str(
            "workers: 2\nretry:\n  max_attempts: 5\nrender:\n  enabled: false\n",
        )
        .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert!(!config.render.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = OrchestratorConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EcoError::InvalidParameter { .. })
        ));
    }
}
