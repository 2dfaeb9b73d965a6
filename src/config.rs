//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub queue: QueueConfig,
    pub engine: EngineConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Storage layout configuration.
///
/// Everything durable lives under one data directory: round records, chunk
/// staging, assembled audio artifacts, transcripts, and the queue document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// Streaming-ingest tuning.
///
/// ## Fields:
/// - `heartbeat_secs`: interval between server `ping` frames (liveness only,
///   no timeout is enforced on the reply)
/// - `orphan_ttl_secs`: manifest age past which the external sweep treats a
///   round's staging data as abandoned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub heartbeat_secs: u64,
    pub orphan_ttl_secs: u64,
}

/// Job queue and worker tuning.
///
/// ## Fields:
/// - `max_attempts`: claims allowed per job before it is parked as errored
/// - `poll_secs`: worker sleep between empty claim attempts
/// - `lock_ttl_secs`: age past which an unreleased queue lock is presumed
///   abandoned and reclaimed
/// - `lock_retry_ms` / `lock_retries`: fixed backoff delay and cap while a
///   live lock is held by another process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub poll_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_retry_ms: u64,
    pub lock_retries: u32,
}

/// External transcription engine configuration.
///
/// The engine is a black-box subprocess: `<command> <script> --model <dir>
/// --input <audio> --output <json>`. Models are laid out one directory per
/// language code under `models_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub command: String,
    pub script: String,
    pub models_dir: String,
    pub default_language: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
            },
            ingest: IngestConfig {
                heartbeat_secs: 15,
                orphan_ttl_secs: 3600,
            },
            queue: QueueConfig {
                max_attempts: 3,
                poll_secs: 5,
                lock_ttl_secs: 600,      // 10 minutes
                lock_retry_ms: 250,
                lock_retries: 20,
            },
            engine: EngineConfig {
                command: "python3".to_string(),
                script: "scripts/vosk_transcribe.py".to_string(),
                models_dir: "models".to_string(),
                default_language: "en".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment
    /// variables, in that priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `HOST` / `PORT`: special cases used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT variables that
        // don't follow the APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage data_dir cannot be empty"));
        }

        if self.queue.max_attempts == 0 {
            return Err(anyhow::anyhow!("Queue max_attempts must be greater than 0"));
        }

        if self.queue.poll_secs == 0 {
            return Err(anyhow::anyhow!("Queue poll_secs must be greater than 0"));
        }

        if self.queue.lock_ttl_secs == 0 {
            return Err(anyhow::anyhow!("Queue lock_ttl_secs must be greater than 0"));
        }

        if self.ingest.heartbeat_secs == 0 {
            return Err(anyhow::anyhow!("Ingest heartbeat_secs must be greater than 0"));
        }

        if self.engine.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Engine command cannot be empty"));
        }

        Ok(())
    }
}
