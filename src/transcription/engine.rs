//! # Transcription Engine
//!
//! Adapter around the external speech-to-text process. The engine is a black
//! box invoked as:
//!
//! ```text
//! <command> <script> --model <models_dir>/<language> --input <audio> --output <json>
//! ```
//!
//! and judged purely on its exit status and the JSON it writes:
//! `{text, words: [{word, start, end, confidence}], duration}`. The stock
//! engine (a VOSK wrapper) spells the word list `result` and word confidence
//! `conf`; both spellings are accepted.
//!
//! Every failure mode (unspawnable command, non-zero exit, absent or
//! malformed output) maps to an Engine error, which is terminal for the job
//! that triggered it.

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info};

/// Word-level timing from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    /// Seconds from the start of the artifact
    pub start: f64,
    pub end: f64,
    #[serde(default, alias = "conf")]
    pub confidence: f64,
}

/// Parsed engine output.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "result")]
    pub words: Vec<WordTiming>,
    #[serde(default)]
    pub duration: f64,
}

/// Handle on the configured external engine.
pub struct TranscriptionEngine {
    command: String,
    script: PathBuf,
    models_dir: PathBuf,
}

impl TranscriptionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            command: config.command.clone(),
            script: PathBuf::from(&config.script),
            models_dir: PathBuf::from(&config.models_dir),
        }
    }

    /// Model directory for a language code.
    fn model_path(&self, language: &str) -> PathBuf {
        self.models_dir.join(language)
    }

    /// Run the engine over one audio artifact.
    ///
    /// The engine writes its JSON next to the artifact; the file is removed
    /// once parsed. Stderr from a failed run is folded into the error message
    /// so it lands on the job record.
    pub async fn transcribe(&self, audio_path: &Path, language: &str) -> AppResult<EngineOutput> {
        if !audio_path.is_file() {
            return Err(AppError::Engine(format!(
                "audio file not found: {}",
                audio_path.display()
            )));
        }

        let output_path = PathBuf::from(format!("{}.engine.json", audio_path.display()));
        let model = self.model_path(language);
        let started = Instant::now();

        debug!(
            audio = %audio_path.display(),
            language,
            model = %model.display(),
            "invoking transcription engine"
        );

        let output = Command::new(&self.command)
            .arg(&self.script)
            .arg("--model")
            .arg(&model)
            .arg("--input")
            .arg(audio_path)
            .arg("--output")
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| AppError::Engine(format!("failed to spawn '{}': {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let raw = std::fs::read_to_string(&output_path).map_err(|e| {
            AppError::Engine(format!(
                "engine produced no readable output at {}: {}",
                output_path.display(),
                e
            ))
        })?;
        let parsed: EngineOutput = serde_json::from_str(&raw)
            .map_err(|e| AppError::Engine(format!("malformed engine output: {}", e)))?;

        let _ = std::fs::remove_file(&output_path);

        info!(
            audio = %audio_path.display(),
            language,
            words = parsed.words.len(),
            duration = parsed.duration,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription finished"
        );
        Ok(parsed)
    }
}
