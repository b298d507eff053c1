use crate::application::queue::{JobHandle, JobStatus};
use crate::application::Pipeline;
use crate::domain::jobs::{JobId, JobKind, TranscodeRequest, TranscodingSettings};
use crate::domain::rendition::ChangeSet;
use crate::domain::video::VideoId;
use crate::error::{PipelineError, RegistryError, TranscodeError};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::path::{Component, PathBuf};
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Scratch directory for multipart uploads.
    pub upload_dir: PathBuf,
}

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Status(StatusCode, String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        ApiError::Status(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pipeline(e) => {
                let status = match &e {
                    PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                    PipelineError::UnknownVideo(_)
                    | PipelineError::Registry(RegistryError::UnknownVideo(_)) => {
                        StatusCode::NOT_FOUND
                    }
                    PipelineError::Registry(RegistryError::AlreadyRegistered(_)) => {
                        StatusCode::CONFLICT
                    }
                    PipelineError::Transcode(
                        TranscodeError::SourceUnreadable(_) | TranscodeError::UnsupportedTarget(_),
                    ) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Status(status, message) => (status, message),
        };

        if status.is_server_error() {
            error!(status = %status, error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of `POST /api/v1/videos/:id/transcoding`.
#[derive(Debug, Default, Deserialize)]
pub struct TranscodingOptions {
    pub resolution: Option<u32>,
    #[serde(default)]
    pub generate_hls: bool,
    #[serde(default)]
    pub generate_all_resolutions: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    #[serde(flatten)]
    pub kind: JobKind,
    pub attached: bool,
    pub status: String,
}

impl From<&JobHandle> for JobView {
    fn from(handle: &JobHandle) -> Self {
        let status = match handle.status() {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done(_) => "done",
            JobStatus::Failed(_) => "failed",
        };
        Self {
            id: handle.id(),
            kind: handle.key().kind,
            attached: handle.attached(),
            status: status.to_string(),
        }
    }
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/api/v1/videos", post(upload_video))
        .route("/api/v1/videos/:id", get(get_video))
        .route("/api/v1/videos/:id/transcoding", post(create_transcoding_job))
        .route(
            "/api/v1/config/transcoding",
            get(get_transcoding).put(put_transcoding),
        )
        .route("/federation/inbox", post(federation_inbox))
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }
    router.layer(TraceLayer::new_for_http()).layer(cors)
}

// Accepts a multipart upload, streams the first file field to disk and ingests it.
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        if !path_is_valid(&PathBuf::from(&file_name)) {
            return Err((StatusCode::BAD_REQUEST, "Invalid file name".to_owned()).into());
        }

        let video = VideoId::generate();
        let extension = PathBuf::from(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "mp4".to_string());
        tokio::fs::create_dir_all(&state.upload_dir)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let path = state.upload_dir.join(format!("{}.{}", video, extension));

        info!(video = %video, file = %file_name, "receiving upload");
        stream_to_file(&path, field).await?;
        let ingested = state.pipeline.ingest(&video, &path).await;
        // Storage keeps its own copy.
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove uploaded scratch file");
        }
        let job = ingested?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "id": video,
                "job": job.as_ref().map(JobView::from),
            })),
        ));
    }

    Err((StatusCode::BAD_REQUEST, "No file field in upload".to_owned()).into())
}

async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::domain::rendition::Renditions>, ApiError> {
    let video = VideoId::new(id);
    state
        .pipeline
        .list(&video)
        .map(Json)
        .ok_or_else(|| PipelineError::UnknownVideo(video).into())
}

async fn create_transcoding_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TranscodingOptions>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    let request = TranscodeRequest {
        video: VideoId::new(id),
        resolution: options.resolution,
        generate_hls: options.generate_hls,
        generate_all_resolutions: options.generate_all_resolutions,
    };

    let handles = state.pipeline.submit(&request)?;
    let jobs: Vec<JobView> = handles.iter().map(JobView::from).collect();
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobs": jobs }))))
}

async fn get_transcoding(State(state): State<AppState>) -> Json<TranscodingSettings> {
    Json(state.pipeline.settings())
}

async fn put_transcoding(
    State(state): State<AppState>,
    Json(settings): Json<TranscodingSettings>,
) -> Result<StatusCode, ApiError> {
    if settings.resolutions.iter().any(|r| r.height() == 0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "resolutions must be positive".to_owned(),
        )
            .into());
    }
    state.pipeline.set_transcoding(settings);
    Ok(StatusCode::NO_CONTENT)
}

async fn federation_inbox(
    State(state): State<AppState>,
    Json(changeset): Json<ChangeSet>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let applied = state
        .pipeline
        .registry()
        .apply_replicated(&changeset)
        .map_err(PipelineError::from)?;
    Ok(Json(json!({ "applied": applied })))
}

// Save a `Stream` to a file
async fn stream_to_file<S, E>(path: &PathBuf, stream: S) -> Result<(), (StatusCode, String)>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    async {
        let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        let body_reader = StreamReader::new(body_with_io_error);
        futures::pin_mut!(body_reader);

        let mut file = BufWriter::new(File::create(path).await?);
        tokio::io::copy(&mut body_reader, &mut file).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;

        Ok::<_, io::Error>(())
    }
    .await
    .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

// A client supplied file name must be a single plain component.
fn path_is_valid(path: &PathBuf) -> bool {
    let mut components = path.components().peekable();
    if let Some(first) = components.peek() {
        if !matches!(first, Component::Normal(_)) {
            return false;
        }
    }
    components.count() == 1
}
