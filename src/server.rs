//! HTTP front end: one authenticated multipart upload endpoint.
//!
//! `POST /files/upload` takes the fields `excel` (file), `project` and
//! `date`, runs the pipeline, and streams the merged PDF back as an
//! attachment. The artifact is deleted after the grace period once the body
//! has been sent (or the client went away).

use crate::auth::{parse_basic, Authenticator};
use crate::config::PipelineConfig;
use crate::delivery::schedule_deletion;
use crate::engine::RenderEngine;
use crate::error::Sheet2PdfError;
use crate::generate::generate;
use crate::pipeline::input::UploadRequest;
use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde_json::json;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Duration;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

/// Extra room on top of the upload cap for the text fields and multipart framing.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Shared, read-only state of the service.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub engine: Arc<dyn RenderEngine>,
    pub auth: Arc<dyn Authenticator>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pipeline(#[from] Sheet2PdfError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"sheet2pdf\"")],
                Json(json!({ "error": "Authentication required." })),
            )
                .into_response(),
            Self::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Pipeline(e) => {
                if !e.is_validation() {
                    tracing::error!("Upload failed: {}", e);
                }
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": e.user_message() })),
                )
                    .into_response()
            }
        }
    }
}

/// Request body cap: the upload limit plus multipart overhead, saturating.
fn body_limit(config: &PipelineConfig) -> usize {
    usize::try_from(config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
}

pub fn router(state: AppState) -> Router {
    let body_limit = body_limit(&state.config);
    Router::new()
        .route("/files/upload", post(upload))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String, ServiceError> {
    let (user, pass) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
        .ok_or(ServiceError::Unauthorized)?;
    state
        .auth
        .authenticate(&user, &pass)
        .map(|p| p.username)
        .ok_or(ServiceError::Unauthorized)
}

fn multipart_error(e: MultipartError, limit: u64) -> ServiceError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::InvalidRequest(format!("File too large (limit {limit} bytes)."))
    } else {
        ServiceError::InvalidRequest(format!("Malformed upload: {}", e.body_text()))
    }
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ServiceError> {
    let user = authorize(&state, &headers)?;
    let limit = state.config.max_upload_bytes;

    let mut project = String::new();
    let mut date = String::new();
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("excel") => {
                let original = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((original, data));
            }
            Some("project") => {
                project = field.text().await.map_err(|e| multipart_error(e, limit))?;
            }
            Some("date") => {
                date = field.text().await.map_err(|e| multipart_error(e, limit))?;
            }
            _ => {}
        }
    }

    let request = match file {
        Some((original, data)) if !data.is_empty() => {
            let work_dir = state.config.work_dir.clone();
            tokio::task::spawn_blocking(move || {
                UploadRequest::from_bytes(&data, original, project, date, &work_dir)
            })
            .await
            .map_err(|e| Sheet2PdfError::Internal(format!("upload task: {e}")))??
        }
        // Validation reports the missing upload after checking the labels.
        _ => UploadRequest {
            source_path: PathBuf::new(),
            original_name: String::new(),
            project_label: project,
            date_label: date,
        },
    };
    tracing::info!("{} uploaded '{}'", user, request.original_name);

    // Run detached so a client disconnect cannot interrupt cleanup.
    let task_state = state.clone();
    let output = tokio::spawn(async move {
        generate(request, task_state.engine.as_ref(), &task_state.config).await
    })
    .await
    .map_err(|e| Sheet2PdfError::Internal(format!("pipeline task: {e}")))??;

    let artifact = output.artifact;
    let grace = Duration::from_secs(state.config.grace_period_secs);
    let opened = tokio::fs::File::open(&artifact.path).await;
    let deletion = DeleteOnDrop {
        path: Some(artifact.path.clone()),
        grace,
    };
    let file = opened.map_err(|source| Sheet2PdfError::ArtifactIo {
        path: artifact.path.clone(),
        source,
    })?;

    let stream = DeletingStream {
        inner: ReaderStream::new(file),
        _deletion: deletion,
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.file_name),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Response body stream that owns the artifact's deletion guard.
struct DeletingStream<S> {
    inner: S,
    _deletion: DeleteOnDrop,
}

impl<S: Stream + Unpin> Stream for DeletingStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Schedules deletion of the artifact when the response body is dropped.
struct DeleteOnDrop {
    path: Option<PathBuf>,
    grace: Duration,
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                schedule_deletion(path, self.grace);
            } else if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("cleanup: failed to delete '{}': {}", path.display(), e);
            }
        }
    }
}
