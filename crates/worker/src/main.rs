use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value;
use shotforge_core::job::JobKind;
use shotforge_db::{JobStore, SqliteJobStore};
use shotforge_events::EventBus;
use shotforge_pipeline::{DatasetEngine, EngineConfig, TrainingRunner};
use shotforge_render::scripted::ScriptedSurface;
use shotforge_render::viewer::{ViewerConfig, ViewerSurface};
use shotforge_render::{DriverOptions, RenderSurface};
use shotforge_worker::{
    prepare, JobRunner, LogFormat, RenderBackend, Scheduler, SchedulerOptions, WorkerConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: shotforge-worker [serve | submit <dataset|training> <asset> [params.json]]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => serve(config).await,
        Some("submit") => submit(config, &args[1..]).await,
        Some(other) => bail!("unknown command `{other}`\n{USAGE}"),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "shotforge_worker=debug,shotforge_pipeline=info,shotforge_render=info,shotforge_db=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn connect(config: &WorkerConfig) -> anyhow::Result<SqliteJobStore> {
    for dir in [
        config.storage_dir.clone(),
        config.uploads_dir(),
        config.temp_dir(),
        config.datasets_dir(),
        config.results_dir(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let store = SqliteJobStore::connect(&config.database_url)
        .await
        .context("Failed to open job database")?;
    shotforge_db::health_check(store.pool())
        .await
        .context("Database health check failed")?;
    tracing::info!(database_url = %config.database_url, "Job database ready");
    Ok(store)
}

async fn serve(config: WorkerConfig) -> anyhow::Result<()> {
    let store = connect(&config).await?;
    let backend = config.render_backend;
    match backend {
        RenderBackend::WebDriver => {
            let surface = ViewerSurface::new(
                ViewerConfig::new(&config.webdriver_url, &config.viewer_url),
                config.session_open_timeout,
            )
            .context("Failed to build WebDriver client")?;
            serve_with(config, store, surface).await
        }
        RenderBackend::Scripted => {
            tracing::warn!("Using the scripted render backend, frames are synthetic");
            serve_with(config, store, ScriptedSurface::default()).await
        }
    }
}

async fn serve_with<S: JobStore, R: RenderSurface>(
    config: WorkerConfig,
    store: S,
    surface: R,
) -> anyhow::Result<()> {
    let defaults = config.load_default_settings()?;
    let engine = DatasetEngine::new(
        surface,
        EngineConfig {
            temp_dir: config.temp_dir(),
            output_dir: config.datasets_dir(),
            driver: DriverOptions {
                open_timeout: config.session_open_timeout,
                load_timeout: config.session_open_timeout,
                ..Default::default()
            },
        },
    );
    let runner = JobRunner::new(engine, TrainingRunner::new(config.results_dir()));
    let scheduler = Scheduler::new(
        store,
        runner,
        Arc::new(EventBus::default()),
        SchedulerOptions::from_config(&config, defaults),
    );

    let report = scheduler.recover().await?;
    if !report.failed.is_empty() {
        tracing::warn!(count = report.failed.len(), "Failed jobs interrupted by the last shutdown");
    }
    scheduler.start();

    shutdown_signal().await;
    scheduler.shutdown().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Validate and persist a job for a running worker to pick up.
async fn submit(config: WorkerConfig, args: &[String]) -> anyhow::Result<()> {
    let (kind, asset, params) = match args {
        [kind, asset] => (kind, asset, None),
        [kind, asset, params] => (kind, asset, Some(params)),
        _ => bail!(USAGE),
    };
    let kind: JobKind = kind.parse()?;
    let overrides = match params {
        Some(path) => read_params(Path::new(path))?,
        None => Value::Null,
    };

    let store = connect(&config).await?;
    let options = SchedulerOptions::from_config(&config, config.load_default_settings()?);
    let new_job = prepare(
        kind,
        &PathBuf::from(asset),
        &overrides,
        &options.asset_policy,
        &options.defaults,
    )?;
    let job = store.insert(&new_job).await?;

    tracing::info!(job_id = %job.id, kind = %job.kind, "Job queued");
    println!("{}", job.id);
    Ok(())
}

fn read_params(path: &Path) -> anyhow::Result<Value> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
