//! # Round Records
//!
//! The Round is the shared contract between this service and the application
//! that owns round metadata. Full CRUD lives elsewhere; this module only
//! reads rounds and drives the status transitions the ingest pipeline is
//! responsible for:
//!
//! - StreamIngestSession: → `streaming` (on init), → `processing` (on
//!   successful completion, with the artifact path)
//! - TranscriptionWorker: → `completed` (with duration and speaker count) or
//!   → `error`
//! - the external orphan sweep may force → `error`
//!
//! Rounds are stored one JSON document per round under `rounds/`.

use crate::error::{AppError, AppResult};
use crate::storage::JsonKv;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle status of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    /// Round created but no audio seen yet
    Created,
    /// Client-side recording in progress, nothing streamed yet
    Recording,
    /// Chunks actively streaming in over a session
    Streaming,
    /// Artifact assembled, transcription queued or running
    Processing,
    /// Transcript persisted
    Completed,
    /// Terminal failure (ingest, queue, or engine)
    Error,
}

impl RoundStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RoundStatus::Created => "created",
            RoundStatus::Recording => "recording",
            RoundStatus::Streaming => "streaming",
            RoundStatus::Processing => "processing",
            RoundStatus::Completed => "completed",
            RoundStatus::Error => "error",
        }
    }
}

/// One recording/transcription session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub status: RoundStatus,
    /// Language code handed to the transcription engine ("en", "fr", ...)
    #[serde(default)]
    pub language: Option<String>,
    /// Assembled audio artifact, set when the round reaches `processing`
    #[serde(default)]
    pub audio_path: Option<String>,
    /// Derived from the transcript when the round completes
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub speaker_count: Option<u32>,
    /// Failure message for rounds in `error`
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read/update access to round records.
///
/// The ingest pipeline assumes a single active writer per round; callers must
/// not run two sessions or two workers against the same round concurrently.
#[derive(Debug)]
pub struct RoundStore {
    kv: Arc<JsonKv>,
}

fn round_key(round_id: &str) -> String {
    format!("rounds/{}.json", round_id)
}

impl RoundStore {
    pub fn new(kv: Arc<JsonKv>) -> Self {
        Self { kv }
    }

    /// Create a round record. Used by tests and by the metadata application
    /// when it shares our data directory.
    pub fn create(&self, round_id: &str, language: Option<&str>) -> AppResult<Round> {
        let now = Utc::now();
        let round = Round {
            id: round_id.to_string(),
            status: RoundStatus::Created,
            language: language.map(|l| l.to_string()),
            audio_path: None,
            duration_seconds: None,
            speaker_count: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.kv.put(&round_key(round_id), &round)?;
        Ok(round)
    }

    pub fn get(&self, round_id: &str) -> AppResult<Option<Round>> {
        self.kv.get(&round_key(round_id))
    }

    /// Fetch a round or fail with NotFound.
    pub fn require(&self, round_id: &str) -> AppResult<Round> {
        self.get(round_id)?
            .ok_or_else(|| AppError::NotFound(format!("round '{}' does not exist", round_id)))
    }

    /// Apply a mutation to a round, refresh `updated_at`, persist.
    pub fn update<F>(&self, round_id: &str, mutate: F) -> AppResult<Round>
    where
        F: FnOnce(&mut Round),
    {
        let mut round = self.require(round_id)?;
        mutate(&mut round);
        round.updated_at = Utc::now();
        self.kv.put(&round_key(round_id), &round)?;
        Ok(round)
    }

    pub fn set_status(&self, round_id: &str, status: RoundStatus) -> AppResult<Round> {
        self.update(round_id, |round| round.status = status)
    }

    /// Park a round in `error` with a failure message.
    pub fn set_error(&self, round_id: &str, message: &str) -> AppResult<Round> {
        self.update(round_id, |round| {
            round.status = RoundStatus::Error;
            round.error = Some(message.to_string());
        })
    }
}
