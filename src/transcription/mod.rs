//! # Transcription Module
//!
//! The bridge between assembled audio artifacts and finished transcripts.
//!
//! ## Key Components:
//! - **Engine**: adapter around the external speech-to-text subprocess,
//!   treated as a black box (audio path + language in, JSON out)
//! - **Transcript**: the persisted structured transcript; its presence on
//!   disk doubles as the crash-recovery signal that a round's work finished

pub mod engine;
pub mod transcript;
