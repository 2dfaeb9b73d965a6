//! # Stream Protocol Frames
//!
//! JSON control messages for the chunked-upload WebSocket protocol. Each
//! chunk's bytes travel as a separate binary frame immediately after its
//! `chunk` control message; everything else is a tagged JSON text frame.
//!
//! Field names are camelCase on the wire to match the browser client.

use serde::{Deserialize, Serialize};

/// Client → server control frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Open (or resume) streaming for a round.
    #[serde(rename_all = "camelCase")]
    Init { round_id: String, mime_type: String },

    /// Announces the next binary frame's sequence number.
    Chunk {
        sequence: u64,
        /// Client capture time (epoch millis); informational only.
        #[serde(default)]
        timestamp: Option<u64>,
    },

    /// The client believes every chunk in [0, totalChunks) has been sent.
    #[serde(rename_all = "camelCase")]
    Complete {
        total_chunks: u64,
        #[serde(default)]
        final_duration: Option<f64>,
    },

    /// Client liveness probe.
    Ping,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Reply to `init`; `lastReceivedSequence` is -1 for a fresh round.
    #[serde(rename_all = "camelCase")]
    Ready {
        session_id: String,
        last_received_sequence: i64,
    },

    /// A chunk's payload has been durably written.
    Ack { sequence: u64 },

    /// Sequences below the most recently announced one that the server has
    /// never received. The client owns backfill.
    Missing { sequences: Vec<u64> },

    /// Typed protocol/persistence error; the connection stays open unless the
    /// code is ROUND_NOT_FOUND.
    Error { message: String, code: String },

    /// Streaming finished: artifact assembled and transcription queued.
    #[serde(rename_all = "camelCase")]
    Complete { chunk_count: u64, audio_path: String },

    /// Reply to a client `ping`, also sent periodically by the server.
    Pong,
}
