//! # Round Recorder Backend - Main Application Entry Point
//!
//! Actix-web server that ingests live or uploaded round audio for
//! transcription.
//!
//! ## Application Architecture:
//! - **config**: configuration (TOML file + environment variables)
//! - **state**: shared stores, queue, and health counters
//! - **storage**: flat-file JSON key-value layer (atomic writes)
//! - **rounds**: the shared Round record and its status contract
//! - **ingest**: chunked-upload protocol core and chunk store
//! - **websocket**: the per-connection streaming actor at `/ws/stream`
//! - **queue**: durable job queue, cross-process lock, and the worker loop
//! - **transcription**: external engine adapter and transcript persistence
//! - **handlers**: HTTP trigger and lookup endpoints
//! - **error**: error taxonomy and HTTP mappings

mod config;
mod error;
mod handlers;
mod health;
mod ingest;
mod queue;
mod rounds;
mod state;
mod storage;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use queue::worker::TranscriptionWorker;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::engine::TranscriptionEngine;

/// Global shutdown signal, set by the signal handler task and polled by the
/// main select loop.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting round-recorder-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // One worker loop per process. It runs crash recovery before it starts
    // polling, so jobs stranded in `processing` by a previous run are
    // reconciled before anything new is claimed.
    let worker = Arc::new(TranscriptionWorker::new(
        app_state.queue.clone(),
        app_state.rounds.clone(),
        app_state.transcripts.clone(),
        Arc::new(TranscriptionEngine::new(&config.engine)),
        Duration::from_secs(config.queue.poll_secs),
        config.engine.default_language.clone(),
    ));
    worker.start();

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/transcribe", web::post().to(handlers::trigger_transcription))
                    .route(
                        "/uploads/transcribe",
                        web::post().to(handlers::trigger_upload_transcription),
                    )
                    .route("/jobs/{id}", web::get().to(handlers::get_job)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/stream", web::get().to(websocket::stream_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate chatty and
/// actix quiet enough to read.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "round_recorder_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without blocking the runtime.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
