//! Command implementations
//!
//! Each command returns the JSON it prints so tests can inspect it.

use crate::cli::{Cli, Commands};
use anyhow::{anyhow, bail, Context};
use checkpoint_core::{spawn_expiry_sweeper, CheckpointConfig, CheckpointManager, ConfigLoader};
use checkpoint_store::{CheckpointStatus, InMemoryKeyValueCache, SqliteDocumentStore, SystemClock};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Load configuration from `--config` or the default location
pub async fn load_config(cli: &Cli) -> anyhow::Result<CheckpointConfig> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    loader
        .load()
        .await
        .with_context(|| format!("Failed to load {}", loader.config_path().display()))
}

/// Manager over the configured SQLite store
///
/// The fast tier is process-local, so every read falls through to the
/// durable store.
pub async fn connect(config: CheckpointConfig) -> anyhow::Result<CheckpointManager> {
    if !config.checkpoints_enabled {
        bail!("Checkpoints are disabled; set checkpoints_enabled = true or CHECKPOINTS_ENABLED=true");
    }

    let durable = SqliteDocumentStore::connect(
        &config.durable.database_path,
        &config.durable.collection,
        config.durable.max_connections,
    )
    .await?;

    Ok(CheckpointManager::with_backends(
        config,
        Arc::new(InMemoryKeyValueCache::new()),
        Arc::new(durable),
        Arc::new(SystemClock),
    ))
}

pub async fn resume(manager: &CheckpointManager, job_id: &str) -> anyhow::Result<Value> {
    let point = manager
        .get_resume_point(job_id)
        .await?
        .ok_or_else(|| anyhow!("Checkpoints are disabled"))?;
    Ok(serde_json::to_value(point)?)
}

pub async fn show(manager: &CheckpointManager, job_id: &str) -> anyhow::Result<Value> {
    match manager.load_checkpoint(job_id).await? {
        Some(record) => Ok(serde_json::to_value(record)?),
        None => bail!("No checkpoint for job {}", job_id),
    }
}

pub async fn list(
    manager: &CheckpointManager,
    domain: Option<&str>,
    status: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<Value> {
    let status = status
        .map(|raw| raw.parse::<CheckpointStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let checkpoints = manager
        .list_checkpoints(domain, status, limit)
        .await?
        .unwrap_or_default();

    let rows: Vec<Value> = checkpoints
        .iter()
        .map(|cp| {
            json!({
                "checkpoint_id": cp.checkpoint_id,
                "job_id": cp.job_id,
                "site_domain": cp.site_domain,
                "job_type": cp.job_type,
                "pipeline_step": cp.pipeline_step,
                "status": cp.status,
                "updated_at": checkpoint_store::checkpoint::timestamp::format(&cp.updated_at),
            })
        })
        .collect();
    Ok(Value::Array(rows))
}

pub async fn fail(manager: &CheckpointManager, checkpoint_id: &str, message: &str) -> anyhow::Result<Value> {
    let id: Uuid = checkpoint_id
        .parse()
        .with_context(|| format!("Invalid checkpoint id '{}'", checkpoint_id))?;
    manager.mark_failed(id, message, None).await?;
    Ok(json!({ "checkpoint_id": id, "status": "failed" }))
}

pub async fn sweep_once(manager: &CheckpointManager) -> anyhow::Result<Value> {
    let removed = manager.clear_expired().await?.unwrap_or(0);
    Ok(json!({ "removed": removed }))
}

/// Sweep on an interval until Ctrl-C
pub async fn sweep_forever(manager: CheckpointManager, every: Duration) -> anyhow::Result<()> {
    let handle = spawn_expiry_sweeper(Arc::new(manager), every);
    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping sweeper");
    handle.abort();
    Ok(())
}

pub async fn indexes(manager: &CheckpointManager) -> anyhow::Result<Value> {
    manager.ensure_indexes().await?;
    Ok(json!({ "indexes": checkpoint_core::durable_indexes().len() }))
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli).await?;

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let sweep_interval = config.sweep_interval();
    let manager = connect(config).await?;

    let output = match cli.command {
        Commands::Resume { job_id } => resume(&manager, &job_id).await?,
        Commands::Show { job_id } => show(&manager, &job_id).await?,
        Commands::List { domain, status, limit } => {
            list(&manager, domain.as_deref(), status.as_deref(), limit).await?
        }
        Commands::Fail { checkpoint_id, message } => fail(&manager, &checkpoint_id, &message).await?,
        Commands::Sweep { every: None } => sweep_once(&manager).await?,
        Commands::Sweep { every: Some(secs) } => {
            let every = if secs == 0 { sweep_interval } else { Duration::from_secs(secs) };
            return sweep_forever(manager, every).await;
        }
        Commands::Indexes => indexes(&manager).await?,
        Commands::Config => serde_json::to_value(manager.config())?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
