//! Ecological index engine.
//!
//! Computes spectral indices and the RSEI composite for GeoTIFF scenes:
//! - `inspect` prints a raster's metadata
//! - `compute` runs one compute request to completion and prints the task
//!   and its results as JSON

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use eco_common::{BandInfo, BandRole, IndexRequest, Sensor, TaskStatus};
use eco_indices::IndexConfig;
use orchestrator::{ComputeRequest, EngineDeps, Orchestrator};
use raster_io::{describe_image, inspect, FileOpener};
use storage::{Catalog, MemoryResultStore, ObjectStorage, ResultStore, StorageBackend};

use config::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "eco-engine")]
#[command(about = "Ecological index computation for multispectral GeoTIFF scenes")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "ECO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print raster metadata as JSON
    Inspect { path: PathBuf },

    /// Compute indices for one scene
    Compute {
        /// GeoTIFF scene (.tif, .tiff, optionally .gz)
        path: PathBuf,

        /// Comma-separated indices, e.g. `ndvi,ndwi,rsei`
        #[arg(short, long, default_value = "ndvi")]
        indices: String,

        /// Sensor, used for the default band layout
        #[arg(long, default_value = "landsat8")]
        sensor: String,

        /// Band assignment `role=index` (1-based); repeatable. Overrides the
        /// sensor layout when given.
        #[arg(short, long = "band")]
        bands: Vec<String>,

        /// Fail the task if it runs longer than this
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Inspect { path } => {
            let metadata = inspect(&path)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        Command::Compute {
            path,
            indices,
            sensor,
            bands,
            deadline_secs,
        } => {
            let config = EngineConfig::load(args.config.as_deref())?;
            let sensor: Sensor = sensor.parse()?;
            let bands = bands
                .iter()
                .map(|b| parse_band(b))
                .collect::<Result<Vec<_>>>()?;

            let mut engine = config.engine.clone();
            if args.config.is_none() {
                engine.index = IndexConfig::for_sensor(sensor);
            }

            let request = ComputeRequest {
                image: describe_image(&path, bands, sensor)?,
                indices: IndexRequest::parse_list(&indices)?,
                deadline: deadline_secs.map(Duration::from_secs),
            };
            compute(&config, engine, request).await
        }
    }
}

async fn compute(
    config: &EngineConfig,
    engine: orchestrator::OrchestratorConfig,
    request: ComputeRequest,
) -> Result<()> {
    if let Some(port) = config.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = port, "Prometheus exporter listening");
    }

    let store: Arc<dyn ResultStore> = match &config.database.url {
        Some(url) => {
            let catalog = Catalog::connect(url, config.database.max_connections).await?;
            catalog.migrate().await?;
            info!("Connected to result catalog");
            Arc::new(catalog)
        }
        None => Arc::new(MemoryResultStore::new()),
    };
    if config.storage == StorageBackend::Memory {
        warn!("Using in-memory blob storage; grids and previews are not kept");
    }
    let blobs = Arc::new(ObjectStorage::new(&config.storage)?);

    let deps = EngineDeps::new(Arc::new(FileOpener), store, blobs);
    let orchestrator = Orchestrator::start(engine, deps)?;
    let task_id = orchestrator.submit(request).await?.task_id;

    let task = tokio::select! {
        task = orchestrator.wait(task_id) => task?,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id = %task_id, "Interrupted, cancelling task");
            orchestrator.cancel(task_id).await?;
            orchestrator.wait(task_id).await?
        }
    };
    let results = orchestrator.results(task_id).await?;
    orchestrator.shutdown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "task": task,
            "results": results,
        }))?
    );

    match task.status {
        TaskStatus::Completed => Ok(()),
        status => anyhow::bail!(
            "task {} ended {}: {}",
            task.id,
            status,
            task.error_message.as_deref().unwrap_or("no error recorded")
        ),
    }
}

/// Parse `role=index`, e.g. `nir=5`.
fn parse_band(arg: &str) -> Result<BandInfo> {
    let (role, index) = arg
        .split_once('=')
        .with_context(|| format!("Band '{}' must look like role=index", arg))?;
    let role: BandRole = role.parse()?;
    let index: u16 = index
        .trim()
        .parse()
        .with_context(|| format!("Invalid band index in '{}'", arg))?;
    Ok(BandInfo::new(role, index))
}
