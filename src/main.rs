use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, path::Path, str::FromStr, sync::Arc};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod models;
mod services;

use services::{
    batch::{BatchOptions, BatchRunner, BatchSummary},
    enumerator::PaginatedEnumerator,
    pool::WorkerPool,
    retry::{RetryExecutor, RetryPolicy},
    storage_service::LocalObjectStore,
    transform::{CommandCompressor, CommandRenderer},
    upstream::DirectoryUpstream,
    workflow::{KeyWorkflow, UpstreamCache},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting preview-compactor with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to metadata database")?,
    );

    let store = Arc::new(LocalObjectStore::new(db, cfg.storage_dir.clone()));
    store.migrate().await.context("applying schema")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let renderer = CommandRenderer::from_command_line(&cfg.render_cmd)
        .context("a render command is required (--render-cmd)")?;
    let compressor = CommandCompressor::from_command_line(&cfg.compress_cmd)
        .context("a compress command is required (--compress-cmd)")?;

    // --- Wire the pipeline ---
    let workflow = KeyWorkflow::new(
        store.clone(),
        Arc::new(DirectoryUpstream::new(cfg.upstream_dir.clone())),
        Arc::new(renderer),
        Arc::new(compressor),
        Arc::new(UpstreamCache::new(cfg.fetch_cache_capacity())),
    )
    .with_force(cfg.force);
    let enumerator = PaginatedEnumerator::new(store, cfg.prefix.clone(), cfg.suffix.clone());
    let retry = RetryExecutor::new(RetryPolicy {
        max_retries: cfg.max_retries,
        attempt_timeout: cfg.attempt_timeout,
    });
    let runner = BatchRunner::new(
        enumerator,
        workflow,
        WorkerPool::new(cfg.concurrency),
        retry,
        BatchOptions {
            start_after: cfg.start_after.clone(),
            max_pages: cfg.max_pages,
        },
    );

    let mut summary = BatchSummary::default();
    let outcome = runner.run(&mut summary).await;
    print_summary(&summary);

    outcome.context("batch aborted; resume with the cursor above")?;
    Ok(())
}

/// Terminal report for the operator.
fn print_summary(summary: &BatchSummary) {
    if !summary.failures.is_empty() {
        println!("Failures:");
        for failure in &summary.failures {
            println!("  {}: {}", failure.key, failure.error);
        }
    }
    println!("Pages:        {}", summary.pages);
    println!("Keys seen:    {}", summary.keys_seen);
    println!("In scope:     {}", summary.keys_in_scope);
    println!("Changed:      {}", summary.changed);
    println!("Already done: {}", summary.unchanged);
    println!("Failed:       {}", summary.failures.len());
    match &summary.last_cursor {
        Some(cursor) => println!("Last cursor:  {cursor}"),
        None => println!("Last cursor:  <none>"),
    }
}
