//! # Stream Ingest Session
//!
//! The per-connection protocol state machine. One `StreamSession` is owned by
//! one WebSocket actor and never shared or persisted; everything durable goes
//! through the chunk store, so a dropped connection loses nothing but the
//! in-flight frame.
//!
//! ## Session Lifecycle:
//! 1. **Init**: nothing accepted but `init` (and pings)
//! 2. **Ready**: waiting for the next `chunk` control message
//! 3. **AwaitingChunk**: a `chunk` message announced a sequence; the next
//!    binary frame is that sequence's payload
//! 4. **Closed**: connection gone, session discarded
//!
//! Chunk numbering is global per round: after a reconnect a fresh session's
//! `init` resumes from the persisted manifest, and `ready` tells the client
//! the highest sequence already on disk.
//!
//! Transport reordering between a chunk's metadata and its payload is
//! tolerated with a single-slot payload buffer. The buffered payload is
//! applied by one iterative transition step when its metadata arrives, never
//! by re-entrant dispatch. A second early payload evicts the first
//! (newest-wins). That policy can drop a chunk under some reorderings; the
//! gap then surfaces through the next `missing` computation and the client
//! re-sends, but the behavior is deliberately surfaced here rather than
//! assumed correct.

use crate::error::{AppError, AppResult};
use crate::ingest::chunk_store::ChunkStore;
use crate::ingest::protocol::ServerMessage;
use crate::queue::queue::{JobQueue, JobSource};
use crate::rounds::{RoundStatus, RoundStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Protocol phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Ready,
    AwaitingChunk,
    Closed,
}

/// What a `complete` frame resolved to.
#[derive(Debug)]
pub enum CompleteAction {
    /// Immediate replies (missing chunks, or a protocol error)
    Reply(Vec<ServerMessage>),
    /// Every chunk is present; the shell should run `complete_round`
    Finish {
        round_id: String,
        mime_type: String,
        total_chunks: u64,
    },
}

/// Per-connection mutable protocol state.
pub struct StreamSession {
    pub session_id: String,
    round_id: Option<String>,
    mime_type: Option<String>,
    phase: SessionPhase,
    /// Next sequence the server expects to be announced
    expected_sequence: i64,
    /// Highest sequence durably written, -1 before any
    last_received_sequence: i64,
    /// Chunks persisted over this connection
    total_received: u64,
    /// Sequence announced by the pending `chunk` message
    pending_sequence: Option<u64>,
    /// Single-slot buffer for a payload that beat its metadata
    early_payload: Option<Vec<u8>>,
    /// `init` frames seen on this connection beyond the first
    reconnects: u32,
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            round_id: None,
            mime_type: None,
            phase: SessionPhase::Init,
            expected_sequence: 0,
            last_received_sequence: -1,
            total_received: 0,
            pending_sequence: None,
            early_payload: None,
            reconnects: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.phase, SessionPhase::Ready | SessionPhase::AwaitingChunk)
    }

    pub fn round_id(&self) -> Option<&str> {
        self.round_id.as_deref()
    }

    /// Chunks durably written over this connection.
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    fn not_initialized() -> ServerMessage {
        ServerMessage::Error {
            code: "NOT_INITIALIZED".to_string(),
            message: "send init before streaming".to_string(),
        }
    }

    fn error_frame(err: &AppError) -> ServerMessage {
        ServerMessage::Error {
            code: err.ws_code(),
            message: err.to_string(),
        }
    }

    /// Handle `init{roundId, mimeType}`.
    ///
    /// The round must exist; an unresolvable round is the one fatal protocol
    /// error (the shell closes the connection when the returned error's code
    /// is ROUND_NOT_FOUND). Any prior manifest is resumed: the reply carries
    /// the highest sequence already on disk so the client can continue from
    /// the last acknowledged point.
    pub fn on_init(
        &mut self,
        round_id: &str,
        mime_type: &str,
        rounds: &RoundStore,
        chunks: &ChunkStore,
    ) -> AppResult<ServerMessage> {
        if rounds.get(round_id)?.is_none() {
            return Err(AppError::protocol(
                "ROUND_NOT_FOUND",
                format!("round '{}' does not exist", round_id),
            ));
        }

        let manifest = chunks.manifest(round_id)?;
        let last = manifest
            .as_ref()
            .and_then(|m| m.max_sequence())
            .map(|seq| seq as i64)
            .unwrap_or(-1);

        rounds.set_status(round_id, RoundStatus::Streaming)?;

        if self.round_id.is_some() {
            self.reconnects += 1;
        }
        self.round_id = Some(round_id.to_string());
        self.mime_type = Some(mime_type.to_string());
        self.phase = SessionPhase::Ready;
        self.expected_sequence = last + 1;
        self.last_received_sequence = last;
        self.pending_sequence = None;
        self.early_payload = None;

        info!(
            session_id = %self.session_id,
            round_id,
            mime_type,
            last_received_sequence = last,
            reconnects = self.reconnects,
            "stream session ready"
        );

        Ok(ServerMessage::Ready {
            session_id: self.session_id.clone(),
            last_received_sequence: last,
        })
    }

    /// Handle `chunk{sequence}` metadata.
    ///
    /// A gap against the expected sequence reports the full backlog of
    /// missing sequences below the announced one, without rejecting the
    /// announced chunk: the client owns backfill, so the expectation always
    /// advances to `sequence + 1`. If a payload already arrived out of order
    /// it is applied to this sequence immediately.
    pub fn on_chunk_meta(&mut self, sequence: u64, chunks: &ChunkStore) -> Vec<ServerMessage> {
        let round_id = match (&self.phase, &self.round_id) {
            (SessionPhase::Ready | SessionPhase::AwaitingChunk, Some(round_id)) => round_id.clone(),
            _ => return vec![Self::not_initialized()],
        };

        let mut replies = Vec::new();

        if self.pending_sequence.take().is_some() {
            // Metadata arrived twice with no payload between; the earlier
            // announcement resurfaces through the missing computation.
            warn!(
                session_id = %self.session_id,
                sequence,
                "chunk announced while a previous announcement was unfulfilled"
            );
        }

        if (sequence as i64) != self.expected_sequence {
            match chunks.find_missing_chunks(&round_id, sequence) {
                Ok(missing) if !missing.is_empty() => {
                    debug!(
                        session_id = %self.session_id,
                        sequence,
                        expected = self.expected_sequence,
                        gaps = missing.len(),
                        "sequence gap detected"
                    );
                    replies.push(ServerMessage::Missing { sequences: missing });
                }
                Ok(_) => {}
                Err(e) => replies.push(Self::error_frame(&e)),
            }
        }

        self.pending_sequence = Some(sequence);
        self.phase = SessionPhase::AwaitingChunk;
        self.expected_sequence = sequence as i64 + 1;

        // A payload that raced ahead of this metadata is consumed by the same
        // transition that a later binary frame would trigger.
        if let Some(buffered) = self.early_payload.take() {
            replies.extend(self.store_pending(&buffered, chunks));
        }

        replies
    }

    /// Handle a binary frame.
    pub fn on_binary(&mut self, payload: &[u8], chunks: &ChunkStore) -> Vec<ServerMessage> {
        if !self.is_initialized() {
            return vec![Self::not_initialized()];
        }

        match self.phase {
            SessionPhase::AwaitingChunk => self.store_pending(payload, chunks),
            _ => {
                // Payload beat its metadata. Keep exactly one; newest wins.
                if self.early_payload.replace(payload.to_vec()).is_some() {
                    warn!(
                        session_id = %self.session_id,
                        "second early payload evicted a buffered one"
                    );
                }
                Vec::new()
            }
        }
    }

    /// Persist the payload for the announced sequence and acknowledge it.
    /// On failure the awaiting state is still cleared so the client can
    /// retry the same sequence.
    fn store_pending(&mut self, payload: &[u8], chunks: &ChunkStore) -> Vec<ServerMessage> {
        let (sequence, round_id) = match (self.pending_sequence.take(), &self.round_id) {
            (Some(seq), Some(round_id)) => (seq, round_id.clone()),
            _ => return vec![Self::not_initialized()],
        };
        self.phase = SessionPhase::Ready;

        let mime_type = self.mime_type.clone().unwrap_or_default();

        match chunks.save_chunk(&round_id, sequence, payload, &mime_type) {
            Ok(_) => {
                self.last_received_sequence = self.last_received_sequence.max(sequence as i64);
                self.total_received += 1;
                vec![ServerMessage::Ack { sequence }]
            }
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    sequence,
                    error = %e,
                    "chunk save failed"
                );
                vec![Self::error_frame(&e)]
            }
        }
    }

    /// Handle `complete{totalChunks}`.
    ///
    /// With gaps outstanding the reply is `missing` and nothing else happens;
    /// the client backfills and retries. Once nothing is missing the shell
    /// finishes the round asynchronously via [`complete_round`].
    pub fn on_complete(&mut self, total_chunks: u64, chunks: &ChunkStore) -> CompleteAction {
        let round_id = match (&self.phase, &self.round_id) {
            (SessionPhase::Ready | SessionPhase::AwaitingChunk, Some(round_id)) => round_id.clone(),
            _ => return CompleteAction::Reply(vec![Self::not_initialized()]),
        };

        match chunks.find_missing_chunks(&round_id, total_chunks) {
            Ok(missing) if !missing.is_empty() => {
                debug!(
                    session_id = %self.session_id,
                    total_chunks,
                    gaps = missing.len(),
                    "complete refused, chunks missing"
                );
                CompleteAction::Reply(vec![ServerMessage::Missing { sequences: missing }])
            }
            Ok(_) => CompleteAction::Finish {
                round_id,
                mime_type: self.mime_type.clone().unwrap_or_default(),
                total_chunks,
            },
            Err(e) => CompleteAction::Reply(vec![Self::error_frame(&e)]),
        }
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Finish a fully-received round: assemble the artifact, admit the
/// transcription job, and only then let the round leave `streaming`.
///
/// Ordering is deliberate. Until both assembly and admission have succeeded
/// the round stays `streaming`, so a failure anywhere leaves the client free
/// to retry `complete` against intact state; the `processing` status and the
/// artifact path become visible in one round update at the end.
pub async fn complete_round(
    round_id: &str,
    mime_type: &str,
    total_chunks: u64,
    chunks: &ChunkStore,
    rounds: &RoundStore,
    queue: &JobQueue,
) -> AppResult<ServerMessage> {
    let artifact = chunks.assemble(round_id, total_chunks, mime_type)?;
    let audio_path = artifact.to_string_lossy().to_string();

    queue
        .enqueue(round_id, &audio_path, JobSource::Recording)
        .await?;

    rounds.update(round_id, |round| {
        round.status = RoundStatus::Processing;
        round.audio_path = Some(audio_path.clone());
    })?;

    info!(round_id, total_chunks, audio_path = %audio_path, "round streaming complete");

    Ok(ServerMessage::Complete {
        chunk_count: total_chunks,
        audio_path,
    })
}
