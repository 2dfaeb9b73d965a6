//! # Chunk Store
//!
//! Durable record of which sequence-numbered audio chunks have reached stable
//! storage for each round, plus assembly of the staged chunks into one
//! artifact.
//!
//! ## On-disk layout (under the data directory):
//! - `streams/<roundId>/manifest.json`: the chunk manifest
//! - `streams/<roundId>/chunks/<seq>.chunk`: staged payloads, zero-padded so
//!   lexical order is sequence order
//! - `audio/<roundId>.<ext>`: the assembled artifact
//!
//! Chunk numbering is global per round, not per connection: a reconnecting
//! client resumes against the same manifest.

use crate::error::{AppError, AppResult};
use crate::storage::JsonKv;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Durable record of received chunk sequences for one round.
///
/// Invariants: `received_sequences` never shrinks while the round is
/// streaming; `total_chunks` is 1 + the highest observed sequence and never
/// decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub round_id: String,
    pub mime_type: String,
    pub received_sequences: BTreeSet<u64>,
    pub total_chunks: u64,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl ChunkManifest {
    fn new(round_id: &str, mime_type: &str) -> Self {
        let now = Utc::now();
        Self {
            round_id: round_id.to_string(),
            mime_type: mime_type.to_string(),
            received_sequences: BTreeSet::new(),
            total_chunks: 0,
            started_at: now,
            last_update: now,
        }
    }

    /// Highest received sequence, or None for an empty manifest.
    pub fn max_sequence(&self) -> Option<u64> {
        self.received_sequences.iter().next_back().copied()
    }

    /// Every sequence in `[0, expected_total)` not yet received, ascending.
    pub fn missing(&self, expected_total: u64) -> Vec<u64> {
        (0..expected_total)
            .filter(|seq| !self.received_sequences.contains(seq))
            .collect()
    }
}

/// Map a MIME type to the artifact file extension.
fn extension_for(mime_type: &str) -> &str {
    let subtype = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .split('/')
        .nth(1)
        .unwrap_or("");
    match subtype {
        "ogg" => "ogg",
        "wav" | "x-wav" | "wave" => "wav",
        "mp4" => "mp4",
        "mpeg" => "mp3",
        _ => "webm",
    }
}

/// Durable chunk staging and artifact assembly for all rounds.
pub struct ChunkStore {
    kv: Arc<JsonKv>,
}

fn manifest_key(round_id: &str) -> String {
    format!("streams/{}/manifest.json", round_id)
}

fn chunk_key(round_id: &str, sequence: u64) -> String {
    format!("streams/{}/chunks/{:06}.chunk", round_id, sequence)
}

impl ChunkStore {
    pub fn new(kv: Arc<JsonKv>) -> Self {
        Self { kv }
    }

    /// Read a round's manifest, or None if the round has no staged chunks.
    pub fn manifest(&self, round_id: &str) -> AppResult<Option<ChunkManifest>> {
        self.kv.get(&manifest_key(round_id))
    }

    /// Persist one chunk and record it in the manifest.
    ///
    /// Idempotent: saving a sequence that is already present overwrites the
    /// payload and leaves the manifest unchanged apart from `last_update`.
    pub fn save_chunk(
        &self,
        round_id: &str,
        sequence: u64,
        bytes: &[u8],
        mime_type: &str,
    ) -> AppResult<ChunkManifest> {
        let path = self.kv.path(&chunk_key(round_id, sequence));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(&path, bytes)
            .map_err(|e| AppError::Persistence(format!("write chunk {}: {}", sequence, e)))?;

        let mut manifest = self
            .manifest(round_id)?
            .unwrap_or_else(|| ChunkManifest::new(round_id, mime_type));
        manifest.received_sequences.insert(sequence);
        manifest.total_chunks = manifest.total_chunks.max(sequence + 1);
        manifest.last_update = Utc::now();
        self.kv.put(&manifest_key(round_id), &manifest)?;

        debug!(
            round_id,
            sequence,
            received = manifest.received_sequences.len(),
            "chunk saved"
        );
        Ok(manifest)
    }

    /// Every sequence in `[0, expected_total)` absent from the manifest,
    /// ascending. A round with no manifest is missing everything.
    pub fn find_missing_chunks(&self, round_id: &str, expected_total: u64) -> AppResult<Vec<u64>> {
        match self.manifest(round_id)? {
            Some(manifest) => Ok(manifest.missing(expected_total)),
            None => Ok((0..expected_total).collect()),
        }
    }

    /// Concatenate chunks `0..total_chunks` in sequence order into the
    /// round's audio artifact.
    ///
    /// Fails fast on the first absent chunk rather than producing a silently
    /// truncated artifact. Staging data is deleted only after the artifact
    /// write has succeeded; the artifact itself goes through a temp file and
    /// rename so a crash cannot leave a partial artifact behind.
    pub fn assemble(
        &self,
        round_id: &str,
        total_chunks: u64,
        mime_type: &str,
    ) -> AppResult<PathBuf> {
        let mut audio = Vec::new();
        for sequence in 0..total_chunks {
            let path = self.kv.path(&chunk_key(round_id, sequence));
            let bytes = fs::read(&path).map_err(|e| {
                AppError::Persistence(format!(
                    "round '{}': chunk {} unreadable during assembly: {}",
                    round_id, sequence, e
                ))
            })?;
            audio.extend_from_slice(&bytes);
        }

        let artifact = self
            .kv
            .path(&format!("audio/{}.{}", round_id, extension_for(mime_type)));
        if let Some(parent) = artifact.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let tmp = artifact.with_extension("part");
        fs::write(&tmp, &audio)
            .map_err(|e| AppError::Persistence(format!("write artifact: {}", e)))?;
        fs::rename(&tmp, &artifact)
            .map_err(|e| AppError::Persistence(format!("finalize artifact: {}", e)))?;

        self.purge_staging(round_id)?;

        info!(
            round_id,
            total_chunks,
            bytes = audio.len(),
            artifact = %artifact.display(),
            "artifact assembled"
        );
        Ok(artifact)
    }

    /// Remove a round's staging directory (chunks + manifest).
    ///
    /// Part of the orphan-sweep consumer contract as well as the normal
    /// post-assembly cleanup.
    pub fn purge_staging(&self, round_id: &str) -> AppResult<()> {
        let dir = self.kv.path(&format!("streams/{}", round_id));
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Persistence(format!(
                "purge {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Rounds whose manifest has not been touched for longer than `max_age`.
    ///
    /// The external sweep combines this with a round-status check: a stale
    /// manifest whose round is not actively streaming is abandoned, its
    /// staging purged and its round forced to error.
    pub fn stale_round_ids(&self, max_age: Duration) -> AppResult<Vec<String>> {
        let now = Utc::now();
        let mut stale = Vec::new();
        for round_id in self.kv.list_subdirs("streams")? {
            if let Some(manifest) = self.manifest(&round_id)? {
                if now.signed_duration_since(manifest.last_update) > max_age {
                    stale.push(round_id);
                }
            }
        }
        Ok(stale)
    }
}
