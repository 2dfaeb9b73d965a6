//! Job status lookup: `GET /api/v1/jobs/{id}`.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

pub async fn get_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = Uuid::parse_str(&path)
        .map_err(|_| AppError::BadRequest(format!("'{}' is not a job id", path)))?;

    let job = state
        .queue
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job '{}' does not exist", id)))?;

    Ok(HttpResponse::Ok().json(json!({
        "job": {
            "id": job.id,
            "roundId": job.round_id,
            "audioPath": job.audio_path,
            "source": job.source,
            "status": job.status,
            "attempts": job.attempts,
            "createdAt": job.created_at.to_rfc3339(),
            "updatedAt": job.updated_at.to_rfc3339(),
            "lastError": job.last_error,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::queue::queue::JobSource;

    fn state() -> (tempfile::TempDir, web::Data<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();
        let state = web::Data::new(AppState::new(config).unwrap());
        (dir, state)
    }

    #[actix_web::test]
    async fn test_get_job_found_and_missing() {
        let (_dir, state) = state();
        state.rounds.create("r1", None).unwrap();
        let job = state
            .queue
            .enqueue("r1", "a.webm", JobSource::Upload)
            .await
            .unwrap();

        let ok = get_job(state.clone(), web::Path::from(job.id.to_string()))
            .await
            .unwrap();
        assert_eq!(ok.status(), actix_web::http::StatusCode::OK);

        let err = get_job(state.clone(), web::Path::from(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = get_job(state, web::Path::from("not-a-uuid".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
