//! The HTTP boundary.
//!
//! Three routes: `/stream` delivers chunked audio, `/info` serves resolved
//! track metadata, `/health` probes the external programs. Validation happens
//! here, before anything is spawned; typed pipeline errors are mapped to
//! status codes on the way out.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Config;
use crate::filter::FilterSpec;
use crate::metadata::TrackSource;
use crate::pipeline::{AudioPipeline, StreamRequest, SHELL_METACHARACTERS};
use crate::process::{probe_version, OutputFormat};
use crate::Error;

/// Longest accepted query string, in characters.
const MAX_QUERY_CHARS: usize = 500;

/// Deadline for each dependency probe on `/health`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pipeline: Arc<AudioPipeline>,
    config: Arc<Config>,
}

impl AppState {
    /// Builds the application state, including the pipeline and its cache.
    pub fn new(config: Config) -> Self {
        Self {
            pipeline: Arc::new(AudioPipeline::new(config.clone())),
            config: Arc::new(config),
        }
    }

    /// The pipeline serving this state.
    pub fn pipeline(&self) -> &AudioPipeline {
        &self.pipeline
    }
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/info", get(info))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    query: Option<String>,
    start: Option<u64>,
    filter: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoParams {
    query: Option<String>,
}

async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let query = validate_query(params.query.as_deref())?;
    // An unknown filter name is "no filter", but an unknown format would
    // silently change the bytes we serve, so that one is rejected.
    let filter = FilterSpec::parse(params.filter.as_deref().unwrap_or_default());
    let format = match params.format.as_deref() {
        None => OutputFormat::default(),
        Some(raw) => OutputFormat::parse(raw)
            .ok_or_else(|| Error::Validation(format!("unknown output format {raw:?}")))?,
    };

    let request = StreamRequest::new(query)
        .start_offset(Duration::from_secs(params.start.unwrap_or(0)))
        .filter(filter)
        .format(format);
    let audio = state.pipeline.stream(request).await?;

    let content_type = audio.content_type();
    Ok((
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(audio),
    )
        .into_response())
}

/// Response body for `/info`.
#[derive(Debug, Serialize)]
struct InfoResponse {
    title: String,
    url: String,
    #[serde(rename = "durationSec")]
    duration_sec: u64,
    thumbnail: Option<String>,
    author: String,
    source: TrackSource,
}

async fn info(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> Result<Json<InfoResponse>, ApiError> {
    let query = validate_query(params.query.as_deref())?;
    let track = state.pipeline.metadata(&query).await?;
    Ok(Json(InfoResponse {
        title: track.title,
        url: track.url,
        duration_sec: track.duration_seconds,
        thumbnail: track.thumbnail_url,
        author: track.author,
        source: track.source,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    dependencies: Dependencies,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
struct Dependencies {
    ytdlp: DependencyStatus,
    ffmpeg: DependencyStatus,
}

#[derive(Debug, Serialize)]
struct DependencyStatus {
    available: bool,
    version: Option<String>,
}

impl From<Option<String>> for DependencyStatus {
    fn from(version: Option<String>) -> Self {
        Self {
            available: version.is_some(),
            version,
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (ytdlp, ffmpeg) = tokio::join!(
        probe_version(&state.config.extractor_path, "--version", PROBE_TIMEOUT),
        probe_version(&state.config.transcoder_path, "-version", PROBE_TIMEOUT),
    );
    let status = match (ytdlp.is_some(), ffmpeg.is_some()) {
        (true, true) => HealthStatus::Healthy,
        // Without the transcoder, passthrough streaming still works.
        (true, false) => HealthStatus::Degraded,
        (false, _) => HealthStatus::Unhealthy,
    };
    Json(HealthResponse {
        status,
        dependencies: Dependencies {
            ytdlp: ytdlp.into(),
            ffmpeg: ffmpeg.into(),
        },
    })
}

/// Validates the raw `query` parameter. Rejection happens before any process
/// is spawned.
fn validate_query(raw: Option<&str>) -> Result<String, Error> {
    let Some(raw) = raw else {
        return Err(Error::Validation("missing query parameter".to_owned()));
    };
    let query = raw.trim();
    if query.is_empty() {
        return Err(Error::Validation("query must not be empty".to_owned()));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(Error::Validation(format!(
            "query exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    if query.contains("..") || query.starts_with('/') {
        return Err(Error::Validation(
            "query must not look like a file path".to_owned(),
        ));
    }
    if query.to_lowercase().starts_with("http") {
        return Err(Error::Validation(
            "direct URLs are not accepted, use a search query".to_owned(),
        ));
    }
    if query
        .chars()
        .any(|c| SHELL_METACHARACTERS.contains(&c) || c.is_control())
    {
        return Err(Error::Validation(
            "query contains disallowed characters".to_owned(),
        ));
    }
    Ok(query.to_owned())
}

/// Wrapper mapping pipeline errors onto HTTP responses.
#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NoResults(_) => StatusCode::NOT_FOUND,
            Error::Busy => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout | Error::ProcessStartTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::ProcessExited { .. } | Error::MetadataParse(_) | Error::Provider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            debug!(error = %self.0, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
