//! Persisted structured transcripts, one JSON document per round.

use crate::error::AppResult;
use crate::storage::JsonKv;
use crate::transcription::engine::WordTiming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage key for a round's transcript.
pub fn transcript_key(round_id: &str) -> String {
    format!("transcripts/{}.json", round_id)
}

/// The finished transcript for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl TranscriptDocument {
    pub fn new(text: &str, words: Vec<WordTiming>, duration_seconds: f64) -> Self {
        Self {
            text: text.to_string(),
            words,
            duration_seconds,
            created_at: Utc::now(),
        }
    }
}

/// Read/write access to transcript documents.
#[derive(Debug)]
pub struct TranscriptStore {
    kv: Arc<JsonKv>,
}

impl TranscriptStore {
    pub fn new(kv: Arc<JsonKv>) -> Self {
        Self { kv }
    }

    pub fn save(&self, round_id: &str, transcript: &TranscriptDocument) -> AppResult<()> {
        self.kv.put(&transcript_key(round_id), transcript)
    }

    pub fn get(&self, round_id: &str) -> AppResult<Option<TranscriptDocument>> {
        self.kv.get(&transcript_key(round_id))
    }

    /// Whether a transcript already exists for the round. Crash recovery uses
    /// this to tell a finished job from an interrupted one.
    pub fn exists(&self, round_id: &str) -> bool {
        self.kv.exists(&transcript_key(round_id))
    }
}
