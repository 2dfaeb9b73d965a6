//! # Transcription Job Queue
//!
//! Durable, single-node job queue with crash recovery.
//!
//! ## Key Components:
//! - **Lock**: cross-process exclusive lock file with TTL reclaim, so several
//!   server processes can safely share one queue document
//! - **Queue**: the persisted job collection with idempotent admission,
//!   bounded-retry claiming, and startup reconciliation
//! - **Worker**: the cooperative loop that drains the queue through the
//!   external transcription engine

pub mod lock;
pub mod queue;
pub mod worker;
