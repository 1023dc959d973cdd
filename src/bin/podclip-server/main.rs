use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{Next, from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::level_filters::LevelFilter;
use tracing::{Level, error, info, warn};

mod metrics;

use podclip::clipper::ClipReport;
use podclip::codec::Ffmpeg;
use podclip::gemini::{DEFAULT_MODEL, GeminiClient};
use podclip::storage::{ObjectStorage, RemoteStorage};
use podclip::tracker::CommandTracker;
use podclip::transcriber::WhisperTranscriber;
use podclip::{ClipOpts, Clipper, Collaborators, ProcessReport, ProcessRequest};

#[derive(Parser, Debug, Clone)]
#[command(name = "podclip-server")]
#[command(about = "HTTP server that turns long recordings into captioned vertical clips")]
struct Params {
    /// Bearer token every `POST /process-video` request must present.
    #[arg(long = "auth-token", env = "AUTH_TOKEN", hide_env_values = true)]
    auth_token: String,

    /// Path to a whisper.cpp model file (e.g. `ggml-large-v3.bin`).
    #[arg(short = 'm', long = "model", env = "PODCLIP_WHISPER_MODEL")]
    model_path: String,

    /// Spoken language of the source videos; auto-detected when unset.
    #[arg(long = "spoken-language")]
    spoken_language: Option<String>,

    /// API key for the Gemini models that suggest moments, translate and write metadata.
    #[arg(long = "gemini-api-key", env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: String,

    #[arg(long = "gemini-model", env = "PODCLIP_GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    gemini_model: String,

    /// Speaker tracker command line; `--videoName` and `--videoFolder` are appended.
    #[arg(long = "tracker-command", env = "PODCLIP_TRACKER_COMMAND")]
    tracker_command: String,

    /// Working directory for the tracker command.
    #[arg(long = "tracker-dir", env = "PODCLIP_TRACKER_DIR")]
    tracker_dir: Option<PathBuf>,

    /// Deadline for one tracker run, in seconds.
    #[arg(long = "tracker-timeout-secs", default_value_t = 1800)]
    tracker_timeout_secs: u64,

    /// Deadline for one object-storage download or upload, in seconds.
    #[arg(long = "storage-timeout-secs", default_value_t = 900)]
    storage_timeout_secs: u64,

    /// ffmpeg binary to run.
    #[arg(long = "ffmpeg", env = "PODCLIP_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// S3 bucket holding source videos and rendered clips.
    #[arg(long = "bucket", env = "PODCLIP_BUCKET", conflicts_with = "storage_root")]
    bucket: Option<String>,

    #[arg(long = "region", env = "AWS_DEFAULT_REGION", default_value = "us-east-1")]
    region: String,

    /// Serve keys from a local directory instead of S3.
    #[arg(long = "storage-root", env = "PODCLIP_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Directory for run workspaces; the system temp directory when unset.
    #[arg(long = "work-root", env = "PODCLIP_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Clip windows rendered at once within a run.
    #[arg(long = "clip-workers", default_value_t = 2)]
    clip_workers: usize,

    /// Runs processed at once; further requests wait their turn.
    #[arg(long = "max-concurrent-runs", default_value_t = 1)]
    max_concurrent_runs: usize,

    #[arg(long = "max-clips", default_value_t = 3)]
    max_clips: usize,

    /// Deadline for each model call, in seconds.
    #[arg(long = "call-timeout-secs", default_value_t = 120)]
    call_timeout_secs: u64,

    /// Deadline for a whole request, in seconds.
    #[arg(long = "request-timeout-secs", default_value_t = 3600)]
    request_timeout_secs: u64,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 64 * 1024)]
    max_bytes: usize,
}

impl Params {
    fn clip_opts(&self) -> ClipOpts {
        ClipOpts {
            max_clips: self.max_clips,
            clip_workers: self.clip_workers.max(1),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            ..ClipOpts::default()
        }
    }
}

#[derive(Clone)]
struct AppState {
    clipper: Arc<Clipper>,
    runs: Arc<Semaphore>,
    auth_token: Arc<str>,
}

/// Response body for runs that produced no report. Mirrors the report's shape so callers
/// always find `status` and `clips_planned`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    clips_planned: usize,
    s3_prefix: Option<String>,
    language: Option<String>,
    clips: Vec<ClipReport>,
    error: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "missing or invalid bearer token".into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn processing_failed() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "processing failed".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            status: "error",
            clips_planned: 0,
            s3_prefix: None,
            language: None,
            clips: Vec::new(),
            error: self.message,
        });

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[tokio::main]
async fn main() {
    podclip::logging::init_with_default(LevelFilter::INFO);

    if let Err(err) = run().await {
        error!(error = ?err, "podclip-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();
    metrics::init();

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    // Model loading and the blocking HTTP client must stay off the async workers.
    let handle = Handle::current();
    let setup = params.clone();
    let clipper = tokio::task::spawn_blocking(move || build_clipper(&setup, handle))
        .await
        .context("clipper setup panicked")??;

    let state = AppState {
        clipper: Arc::new(clipper),
        runs: Arc::new(Semaphore::new(params.max_concurrent_runs.max(1))),
        auth_token: Arc::from(params.auth_token.as_str()),
    };

    let process = post(process_video).route_layer(from_fn_with_state(state.clone(), require_bearer));

    let app = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/process-video", process)
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(params.max_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(params.request_timeout_secs)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Load every collaborator once; they are shared by all runs.
fn build_clipper(params: &Params, handle: Handle) -> Result<Clipper> {
    let opts = params.clip_opts();

    let transcriber = WhisperTranscriber::new(&params.model_path)
        .context("failed to load whisper model")?
        .with_language(params.spoken_language.clone());

    let gemini = Arc::new(
        GeminiClient::new(params.gemini_api_key.clone(), opts.call_timeout)?
            .with_model(params.gemini_model.clone()),
    );

    let mut tracker = CommandTracker::from_command_line(&params.tracker_command)?
        .with_timeout(Duration::from_secs(params.tracker_timeout_secs));
    if let Some(dir) = &params.tracker_dir {
        tracker = tracker.with_current_dir(dir);
    }

    let storage = match (&params.bucket, &params.storage_root) {
        (Some(bucket), _) => RemoteStorage::s3(bucket, &params.region, handle)?,
        (None, Some(root)) => RemoteStorage::local(root, handle)?,
        (None, None) => bail!("either --bucket or --storage-root must be set"),
    };
    let storage: Arc<dyn ObjectStorage> =
        Arc::new(storage.with_timeout(Duration::from_secs(params.storage_timeout_secs)));

    let collab = Collaborators {
        storage,
        codec: Arc::new(Ffmpeg::with_program(&params.ffmpeg)),
        transcriber: Arc::new(transcriber),
        suggester: gemini.clone(),
        tracker: Arc::new(tracker),
        translator: gemini.clone(),
        metadata: gemini,
    };

    let mut clipper = Clipper::new(collab, opts);
    if let Some(root) = &params.work_root {
        clipper = clipper.with_work_root(root);
    }
    Ok(clipper)
}

async fn root() -> &'static str {
    "podclip-server: POST /process-video {\"s3_key\": \"...\", \"language\": \"...\"}"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn require_bearer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    check_bearer(req.headers(), &state.auth_token)?;
    Ok(next.run(req).await)
}

fn check_bearer(headers: &HeaderMap, expected: &str) -> std::result::Result<(), AppError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if !expected.is_empty() && tokens_match(token, expected) => Ok(()),
        _ => Err(AppError::unauthorized()),
    }
}

/// Compare without stopping at the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn process_video(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ProcessRequest>, JsonRejection>,
) -> std::result::Result<Json<ProcessReport>, AppError> {
    let Json(request) =
        payload.map_err(|err| AppError::bad_request(format!("invalid request body: {}", err.body_text())))?;
    if request.s3_key.trim().is_empty() {
        return Err(AppError::bad_request("s3_key must not be empty"));
    }

    let permit = state
        .runs
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| AppError::processing_failed())?;

    let clipper = state.clipper.clone();
    let key = request.s3_key.clone();
    let outcome = spawn_run(permit, move || {
        let outcome = clipper.process(&request);
        match &outcome {
            Ok(report) => metrics::record_run(report),
            Err(_) => metrics::record_failed_run(),
        }
        outcome
    })
    .await;

    match outcome {
        Ok(Ok(report)) => Ok(Json(report)),
        Ok(Err(err)) => {
            error!(s3_key = %key, error = %err, "run failed");
            Err(AppError::processing_failed())
        }
        Err(err) => {
            metrics::record_failed_run();
            warn!(s3_key = %key, error = %err, "run panicked");
            Err(AppError::processing_failed())
        }
    }
}

/// Run `job` on the blocking pool while holding `permit`.
///
/// The permit is released when the job returns, not when the handler awaiting it is dropped
/// by the request timeout.
fn spawn_run<T, F>(permit: OwnedSemaphorePermit, job: F) -> JoinHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        job()
    })
}
