//! # Streaming Ingest Module
//!
//! Implements the resumable, gap-tolerant chunked-upload pipeline.
//!
//! ## Key Components:
//! - **Protocol**: the JSON control frames exchanged over the WebSocket
//! - **Chunk Store**: durable per-round manifest + staged chunk payloads,
//!   assembled into one audio artifact on completion
//! - **Session**: the per-connection protocol state machine
//!
//! The WebSocket actor shell that feeds frames into a session lives in
//! `src/websocket.rs` at the root level.

pub mod chunk_store;
pub mod protocol;
pub mod session;
