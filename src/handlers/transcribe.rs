//! # Transcription Trigger Endpoints
//!
//! HTTP entry points that admit a transcription job for an artifact that
//! already exists on disk:
//!
//! - `POST /api/v1/transcribe`: re-trigger for a recorded round whose
//!   artifact came out of the streaming pipeline
//! - `POST /api/v1/uploads/transcribe`: artifact produced by an out-of-band
//!   upload
//!
//! Both take `{roundId, audioPath}` and answer
//! `{success, roundId, queued: true, jobId}`. An unknown round is 404,
//! missing or blank inputs are 400. Admission is idempotent per round, so a
//! double-posted request returns the same job.

use crate::error::{AppError, AppResult};
use crate::queue::queue::JobSource;
use crate::rounds::RoundStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub audio_path: Option<String>,
}

impl TranscribeRequest {
    /// Pull out both fields, rejecting absent or blank values.
    fn validated(&self) -> AppResult<(&str, &str)> {
        let round_id = self
            .round_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("roundId is required".to_string()))?;
        let audio_path = self
            .audio_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("audioPath is required".to_string()))?;
        Ok((round_id, audio_path))
    }
}

async fn enqueue_for(
    state: &AppState,
    request: &TranscribeRequest,
    source: JobSource,
) -> AppResult<HttpResponse> {
    let (round_id, audio_path) = request.validated()?;

    // 404 before touching the queue.
    state.rounds.require(round_id)?;

    let job = state.queue.enqueue(round_id, audio_path, source).await?;

    // Mirror the streaming completion path: an admitted round is processing
    // with its artifact recorded.
    state.rounds.update(round_id, |round| {
        round.status = RoundStatus::Processing;
        round.audio_path = Some(audio_path.to_string());
    })?;

    info!(round_id, job_id = %job.id, ?source, "transcription triggered over HTTP");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "roundId": round_id,
        "queued": true,
        "jobId": job.id,
    })))
}

/// `POST /api/v1/transcribe`
pub async fn trigger_transcription(
    state: web::Data<AppState>,
    body: web::Json<TranscribeRequest>,
) -> Result<HttpResponse, AppError> {
    enqueue_for(&state, &body, JobSource::Recording).await
}

/// `POST /api/v1/uploads/transcribe`
pub async fn trigger_upload_transcription(
    state: web::Data<AppState>,
    body: web::Json<TranscribeRequest>,
) -> Result<HttpResponse, AppError> {
    enqueue_for(&state, &body, JobSource::Upload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::queue::queue::JobStatus;

    fn state() -> (tempfile::TempDir, web::Data<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();
        let state = web::Data::new(AppState::new(config).unwrap());
        (dir, state)
    }

    fn request(round_id: Option<&str>, audio_path: Option<&str>) -> TranscribeRequest {
        TranscribeRequest {
            round_id: round_id.map(|s| s.to_string()),
            audio_path: audio_path.map(|s| s.to_string()),
        }
    }

    #[actix_web::test]
    async fn test_trigger_queues_job_and_marks_round() {
        let (_dir, state) = state();
        state.rounds.create("r1", None).unwrap();

        let response = enqueue_for(&state, &request(Some("r1"), Some("audio/r1.webm")), JobSource::Upload)
            .await
            .unwrap();
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);

        let round = state.rounds.require("r1").unwrap();
        assert_eq!(round.status, RoundStatus::Processing);
        assert_eq!(round.audio_path.as_deref(), Some("audio/r1.webm"));

        let stats = state.queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
    }

    #[actix_web::test]
    async fn test_unknown_round_is_404() {
        let (_dir, state) = state();
        let err = enqueue_for(&state, &request(Some("ghost"), Some("a.webm")), JobSource::Recording)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        // And nothing was queued.
        assert_eq!(state.queue.stats().await.unwrap().queued, 0);
    }

    #[actix_web::test]
    async fn test_missing_inputs_are_400() {
        let (_dir, state) = state();
        state.rounds.create("r1", None).unwrap();

        for req in [
            request(None, Some("a.webm")),
            request(Some("r1"), None),
            request(Some("   "), Some("a.webm")),
            request(Some("r1"), Some("")),
        ] {
            let err = enqueue_for(&state, &req, JobSource::Recording).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[actix_web::test]
    async fn test_duplicate_trigger_returns_same_job() {
        let (_dir, state) = state();
        state.rounds.create("r1", None).unwrap();

        enqueue_for(&state, &request(Some("r1"), Some("a.webm")), JobSource::Recording)
            .await
            .unwrap();
        enqueue_for(&state, &request(Some("r1"), Some("a.webm")), JobSource::Recording)
            .await
            .unwrap();

        let stats = state.queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.processing, 0);

        let job = state.queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
    }
}
