use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let uptime_seconds = state.get_uptime_seconds();
    let (active_streams, chunks_received) = {
        let metrics = state.metrics.read().unwrap();
        (metrics.active_streams, metrics.chunks_received)
    };
    let queue = state.queue.stats().await.unwrap_or_default();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "round-recorder-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": state.config.server.host,
            "port": state.config.server.port
        },
        "streaming": {
            "active_streams": active_streams,
            "chunks_received": chunks_received
        },
        "queue": {
            "queued": queue.queued,
            "processing": queue.processing,
            "completed": queue.completed,
            "error": queue.error
        }
    }))
}
