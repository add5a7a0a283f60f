//! HTTP adapter: `POST /generate-video` returns the rendered video as an attachment.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use timelapse_core::{Error, Pipeline, RunRequest, VideoArtifact};

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/generate-video", post(generate_video))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn health() -> &'static str {
    "ok"
}

async fn generate_video(
    State(pipeline): State<Arc<Pipeline>>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|rejection| Error::InvalidInput(rejection.body_text()))?;

    let report = pipeline.run(request, read_video).await?;
    tracing::info!(run_id = %report.run_id, bytes = report.delivered.len(), "sending video");

    let file_name = &pipeline.config().transcode.output_name;
    let content_type = mime_guess::from_path(file_name).first_or_octet_stream();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let content_type = HeaderValue::from_str(content_type.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let headers = [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)];
    Ok((StatusCode::OK, headers, report.delivered).into_response())
}

/// Delivery for HTTP: the body has to be in memory before the run directory goes away.
async fn read_video(video: VideoArtifact) -> timelapse_core::Result<Vec<u8>> {
    Ok(tokio::fs::read(&video.path).await?)
}

/// Pipeline errors rendered as `{"error": "..."}`.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(message = "error generating video", error = ?self.0);
        } else {
            tracing::warn!(message = "rejected request", error = %self.0);
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}
