//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor: the
//! configuration, the durable stores (all rooted in one data directory), the
//! job queue, and a few counters for health reporting.
//!
//! Everything mutable across requests sits behind `Arc` (the stores guard
//! their own on-disk consistency; the counters use `Arc<RwLock<_>>`).

use crate::config::AppConfig;
use crate::ingest::chunk_store::ChunkStore;
use crate::queue::lock::QueueLock;
use crate::queue::queue::JobQueue;
use crate::rounds::RoundStore;
use crate::storage::JsonKv;
use crate::transcription::transcript::TranscriptStore;
use anyhow::Result;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub rounds: Arc<RoundStore>,
    pub chunks: Arc<ChunkStore>,
    pub queue: Arc<JobQueue>,
    pub transcripts: Arc<TranscriptStore>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters surfaced by the health endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Currently connected streaming sessions
    pub active_streams: u32,
    /// Chunks durably written since startup
    pub chunks_received: u64,
}

impl AppState {
    /// Wire up the stores and queue over the configured data directory.
    pub fn new(config: AppConfig) -> Result<Self> {
        let kv = Arc::new(JsonKv::new(&config.storage.data_dir)?);

        let lock = QueueLock::new(
            kv.path("queue/jobs.lock"),
            Duration::from_secs(config.queue.lock_ttl_secs),
            Duration::from_millis(config.queue.lock_retry_ms),
            config.queue.lock_retries,
        );
        let queue = Arc::new(JobQueue::new(kv.clone(), lock, config.queue.max_attempts));

        Ok(Self {
            rounds: Arc::new(RoundStore::new(kv.clone())),
            chunks: Arc::new(ChunkStore::new(kv.clone())),
            transcripts: Arc::new(TranscriptStore::new(kv)),
            queue,
            config,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        })
    }

    pub fn increment_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_streams += 1;
    }

    pub fn decrement_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_streams > 0 {
            metrics.active_streams -= 1;
        }
    }

    pub fn record_chunks(&self, count: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.chunks_received += count;
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();
        let state = AppState::new(config).unwrap();
        (dir, state)
    }

    #[test]
    fn test_stream_counters() {
        let (_dir, state) = state();

        state.increment_active_streams();
        state.increment_active_streams();
        state.decrement_active_streams();
        assert_eq!(state.metrics.read().unwrap().active_streams, 1);

        // Never underflows.
        state.decrement_active_streams();
        state.decrement_active_streams();
        assert_eq!(state.metrics.read().unwrap().active_streams, 0);

        state.record_chunks(3);
        assert_eq!(state.metrics.read().unwrap().chunks_received, 3);
    }

    #[test]
    fn test_stores_share_one_data_dir() {
        let (dir, state) = state();
        state.rounds.create("r1", None).unwrap();
        assert!(dir.path().join("rounds/r1.json").is_file());
    }
}
