use crate::state::AppState;
use crate::wall::{WallError, generate_wall, wall_key};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::Value;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(wall))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state.metrics.gather()?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn wall(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let ttl = state.config.cache_ttl;
    let key = wall_key(state.config.output_format);
    let generator_state = state.clone();
    let result = state
        .cache
        .get_or_create(&key, ttl, || async move {
            generate_wall(&generator_state).await
        })
        .await;
    let (bytes, status) = match result {
        Ok(value) => value,
        Err(err) => {
            state.metrics.observe_wall_error();
            return Err(map_wall_error(err));
        }
    };
    state.metrics.observe_cache_status(status);

    let mut headers = HeaderMap::new();
    let content_type = state.config.output_format.mime();
    if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    headers.insert("X-Cache", HeaderValue::from_static(status.as_header()));
    Ok((StatusCode::OK, headers, bytes).into_response())
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
    pub log_detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
            log_detail: None,
        }
    }

    pub fn with_log_detail(mut self, detail: String) -> Self {
        if !detail.is_empty() {
            self.log_detail = Some(detail);
        }
        self
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::warn!(error = ?error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
            .with_log_detail(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(detail) = self.log_detail.as_deref() {
            tracing::debug!(status = %self.status, detail, "error response");
        }
        (self.status, Json(self.body)).into_response()
    }
}

fn map_wall_error(error: anyhow::Error) -> ApiError {
    let detail = format!("{error:#}");
    if let Some(WallError::NoPictures) = error.downcast_ref::<WallError>() {
        tracing::info!("wall has no pictures");
        return ApiError::new(StatusCode::NOT_FOUND, "no images found").with_log_detail(detail);
    }
    tracing::warn!(error = ?error, "wall generation failed");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to generate image")
        .with_log_detail(detail)
}
