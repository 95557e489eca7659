pub mod api;
pub mod db;
pub mod entity_linker;
pub mod error;
pub mod learning;
pub mod llm;
mod migrations;
pub mod parser;
pub mod processor;
pub mod retrieval;
pub mod scheduler;
pub mod scoring;
pub mod state;
pub mod types;
pub mod util;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use db::{PrismDb, SharedDb};
use llm::ollama::OllamaProvider;
use llm::scripted::ScriptedProvider;
use llm::{CompletionProvider, LlmGateway};
use processor::queue::{self, Job};
use processor::{Pipeline, PipelineSettings};
use scheduler::Scheduler;
use state::AppState;
use types::Config;

/// Channel buffer size for debounced watcher events
const WATCHER_CHANNEL_SIZE: usize = 256;

/// How often degraded transcripts are offered back to the pipeline
const REPROCESS_SWEEP_SECS: u64 = 120;

pub fn run() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = state::load_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    runtime.block_on(serve(config))
}

fn completion_provider(config: &Config) -> Arc<dyn CompletionProvider> {
    if std::env::var("PRISM_OFFLINE").is_ok_and(|v| !v.is_empty() && v != "0") {
        log::warn!("LLM: PRISM_OFFLINE set, running without a model");
        return Arc::new(ScriptedProvider::offline());
    }
    match OllamaProvider::new(&config.llm) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            log::warn!("LLM: could not create Ollama client ({}), running without a model", e);
            Arc::new(ScriptedProvider::offline())
        }
    }
}

/// Start every background service and serve the HTTP API until Ctrl-C.
pub async fn serve(config: Config) -> Result<(), String> {
    let db: SharedDb = Arc::new(parking_lot::Mutex::new(
        PrismDb::open_at(config.database_file())
            .map_err(|e| format!("Failed to open database: {}", e))?,
    ));
    log::info!("Store: opened {}", config.database_file().display());

    let llm = Arc::new(LlmGateway::new(completion_provider(&config), &config.llm));
    let health = llm.refresh_health().await;
    log::info!(
        "LLM: {} model {} ready={}",
        llm.provider_name(),
        llm.model(),
        health.is_ready()
    );

    let shutdown = CancellationToken::new();
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        llm.clone(),
        PipelineSettings::from_config(&config),
        shutdown.clone(),
    ));
    let (work_queue, workers) =
        queue::start_workers(pipeline.clone(), config.pipeline.workers, shutdown.clone());

    queue::queue_interrupted(&db, &work_queue);

    let transcripts_dir = config.transcripts_path();
    let (event_tx, event_rx) = mpsc::channel(WATCHER_CHANNEL_SIZE);
    match watcher::start_watcher(
        transcripts_dir.clone(),
        Duration::from_millis(config.pipeline.debounce_ms),
        event_tx,
        shutdown.clone(),
    ) {
        Ok(_) => {}
        Err(e) => log::error!("Watcher: could not watch {}: {}", transcripts_dir.display(), e),
    }
    queue::forward_file_events(event_rx, work_queue.clone(), shutdown.clone());

    let existing = watcher::scan_directory(&transcripts_dir);
    let offered = existing
        .into_iter()
        .filter(|path| work_queue.enqueue(Job::Ingest(path.clone())))
        .count();
    log::info!("Watcher: startup scan offered {} file(s)", offered);

    queue::spawn_reprocess_sweep(
        pipeline,
        db.clone(),
        work_queue,
        Duration::from_secs(REPROCESS_SWEEP_SECS),
        shutdown.clone(),
    );

    let scheduler = Arc::new(
        Scheduler::new(db.clone(), &config.learner.schedule).map_err(|e| e.to_string())?,
    );
    scheduler.clone().start(shutdown.clone());

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, db, llm, shutdown.clone()).with_scheduler(scheduler);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", bind_address, e))?;
    log::info!("API: listening on http://{}", bind_address);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, api::build_router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("Shutdown requested"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = workers.await {
        log::warn!("WorkQueue: dispatcher ended abnormally: {}", e);
    }
    log::info!("Prism stopped");
    served.map_err(|e| format!("Server error: {}", e))
}
