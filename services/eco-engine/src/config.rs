//! Configuration for the eco-engine binary.
//!
//! Loaded from an optional YAML file, with `${VAR}` and `${VAR:-default}`
//! substitution, then overridden by environment variables:
//!
//! | Variable             | Field                    |
//! |----------------------|--------------------------|
//! | `ECO_WORKERS`        | `engine.workers`         |
//! | `ECO_QUEUE_CAPACITY` | `engine.queue_capacity`  |
//! | `DATABASE_URL`       | `database.url`           |
//! | `ECO_OUTPUT_DIR`     | `storage` (local root)   |
//! | `ECO_METRICS_PORT`   | `metrics_port`           |

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use orchestrator::OrchestratorConfig;
use storage::StorageBackend;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: OrchestratorConfig,
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; results are kept in memory when unset
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl EngineConfig {
    /// Load from `path` (defaults when `None`) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                let expanded = expand_env_vars(&content)?;
                serde_yaml::from_str(&expanded)
                    .with_context(|| format!("Failed to parse config YAML from {:?}", path))?
            }
            None => EngineConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = parse_var(&lookup, "ECO_WORKERS")? {
            self.engine.workers = workers;
        }
        if let Some(capacity) = parse_var(&lookup, "ECO_QUEUE_CAPACITY")? {
            self.engine.queue_capacity = capacity;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(dir) = lookup("ECO_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            self.storage = StorageBackend::Local {
                root: PathBuf::from(dir),
            };
        }
        if let Some(port) = parse_var(&lookup, "ECO_METRICS_PORT")? {
            self.metrics_port = Some(port);
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", name, value)),
        None => Ok(None),
    }
}

/// Expand `${VAR}` and `${VAR:-default}` in YAML content.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((name, default)) = expr.split_once(":-") {
        match std::env::var(name.trim()) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}
