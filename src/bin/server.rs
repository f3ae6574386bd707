use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use cut_packer::config::Config;
use cut_packer::{Engine, Error, Job, JobRunner};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// The job lives either in `job` or, while a pass runs, inside the runner.
struct Session {
    runner: JobRunner,
    job: Option<Job>,
}

#[derive(Clone)]
struct AppState {
    engine: Engine,
    session: Arc<Mutex<Session>>,
}

type ApiError = (StatusCode, String);

fn api_error(e: Error) -> ApiError {
    let status = match e {
        Error::PassInFlight => StatusCode::CONFLICT,
        Error::UnknownMaterial(_) | Error::UnknownSheet { .. } => StatusCode::NOT_FOUND,
        Error::Io(_) | Error::Xml(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn busy() -> ApiError {
    api_error(Error::PassInFlight)
}

impl Session {
    /// The idle job, reclaimed from a finished pass nobody has collected yet.
    fn idle_job(&mut self) -> Result<&mut Job, ApiError> {
        if self.job.is_none() {
            self.job = self.runner.collect();
        }
        self.job.as_mut().ok_or_else(busy)
    }
}

#[derive(Deserialize, Serialize)]
struct ProcessRequest {
    file: PathBuf,
    #[serde(default = "default_copies")]
    copies: u32,
}

fn default_copies() -> u32 {
    1
}

async fn process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<&'static str, ApiError> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /process"
    );
    if req.copies == 0 {
        return Err((StatusCode::BAD_REQUEST, "copies must be non-zero".to_string()));
    }

    let mut session = state.session.lock().await;
    session.idle_job()?;
    let mut job = session.job.take().ok_or_else(busy)?;
    if let Err(e) = state.engine.load_file(&mut job, &req.file, req.copies) {
        session.job = Some(job);
        return Err(api_error(e));
    }
    if let Err(e) = session.runner.pack_async(job.clone()) {
        session.job = Some(job);
        return Err(api_error(e));
    }
    Ok("OK")
}

#[derive(Serialize, Default)]
struct RefreshResponse {
    refresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    insufficient: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crashed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_fits: Option<BTreeMap<String, usize>>,
}

async fn check_refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    let mut session = state.session.lock().await;
    if !session.runner.has_pending() || !session.runner.is_done() {
        return Ok(Json(RefreshResponse::default()));
    }

    let job = session.runner.take_finished().map_err(api_error)?;
    let response = RefreshResponse {
        refresh: true,
        usage: Some(job.percentages().clone()),
        insufficient: Some(job.insufficient_materials()),
        crashed: Some(job.crashed_materials()),
        failed_fits: Some(job.failed_fits().clone()),
    };
    session.job = Some(job);
    Ok(Json(response))
}

#[derive(Deserialize)]
struct MaxCopiesQuery {
    file: PathBuf,
}

async fn max_copies(
    State(state): State<AppState>,
    Query(query): Query<MaxCopiesQuery>,
) -> Result<String, ApiError> {
    tracing::info!(file = %query.file.display(), "GET /maxcopies");

    let job = {
        let mut session = state.session.lock().await;
        session.idle_job()?;
        session.job.take().ok_or_else(busy)?
    };
    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut job = job;
        let found = engine.compute_max_copies(&mut job, &query.file);
        (job, found)
    })
    .await;

    match outcome {
        Ok((job, found)) => {
            state.session.lock().await.job = Some(job);
            found.map(|n| n.to_string()).map_err(api_error)
        }
        Err(e) => {
            // The job went down with the task; start over with an empty one.
            state.session.lock().await.job = Some(Job::new());
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("max copies search failed: {e}")))
        }
    }
}

#[derive(Deserialize)]
struct SupplyQuery {
    material: String,
}

async fn supply_levels(
    State(state): State<AppState>,
    Query(query): Query<SupplyQuery>,
) -> Result<Json<Vec<f64>>, ApiError> {
    let mut session = state.session.lock().await;
    let job = session.idle_job()?;
    let levels = state
        .engine
        .supply_level(job, &query.material)
        .map_err(api_error)?;
    Ok(Json(levels))
}

async fn reset_cache(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    let mut session = state.session.lock().await;
    let job = session.idle_job()?;
    state.engine.reset_cache(job);
    Ok("OK")
}

#[derive(Deserialize, Serialize)]
struct CutRequest {
    jobfile: PathBuf,
    material: String,
    sheet: usize,
}

async fn update_material_database(
    State(state): State<AppState>,
    Json(req): Json<CutRequest>,
) -> Result<&'static str, ApiError> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /update_material_database"
    );
    let mut session = state.session.lock().await;
    let job = session.idle_job()?;
    state
        .engine
        .record_cut(job, &req.material, req.sheet, &req.jobfile)
        .map_err(api_error)?;
    Ok("OK")
}

#[derive(Deserialize, Serialize)]
struct HoleOverlayRequest {
    file: PathBuf,
    material: String,
    sheet: usize,
}

async fn add_holes_to_cut_file(
    State(state): State<AppState>,
    Json(req): Json<HoleOverlayRequest>,
) -> Result<&'static str, ApiError> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /add_holes_to_cut_file"
    );
    state
        .engine
        .add_holes_to_file(&req.file, &req.material, req.sheet)
        .map_err(api_error)?;
    Ok("OK")
}

#[derive(Deserialize)]
struct FileRequest {
    file: PathBuf,
}

async fn remove_holes_from_cut_file(
    State(state): State<AppState>,
    Json(req): Json<FileRequest>,
) -> Result<&'static str, ApiError> {
    tracing::info!(file = %req.file.display(), "POST /remove_holes_from_cut_file");
    state
        .engine
        .remove_holes_from_file(&req.file)
        .map_err(api_error)?;
    Ok("OK")
}

fn load_config() -> cut_packer::Result<Config> {
    match std::env::var("CUT_PACKER_CONFIG") {
        Ok(path) => Config::from_file(path.as_ref()),
        Err(_) => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("development.log")
        .expect("failed to open development.log");

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .init();

    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let config = load_config().expect("failed to load configuration");
    let engine = Engine::from_config(config).expect("failed to set up packing engine");
    let state = AppState {
        session: Arc::new(Mutex::new(Session {
            runner: JobRunner::new(engine.clone()),
            job: Some(Job::new()),
        })),
        engine,
    };

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");

    let app = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/process", post(process))
        .route("/check_refresh", get(check_refresh))
        .route("/maxcopies", get(max_copies))
        .route("/supply_levels", get(supply_levels))
        .route("/reset_cache", post(reset_cache))
        .route("/update_material_database", post(update_material_database))
        .route("/add_holes_to_cut_file", post(add_holes_to_cut_file))
        .route("/remove_holes_from_cut_file", post(remove_holes_from_cut_file))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    eprintln!("Listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}
