//! HTTP surface: paper upload, streaming generation, artifact lookup.
//!
//! `GET /generate/{paper_id}` speaks the progress protocol: one JSON
//! object per line, each tagged with a `status` field, ending with a
//! single `complete` or `error` object. Pipeline runs are bounded by a
//! fixed-size worker pool so a burst of requests cannot pile up generator
//! subprocesses. The self-healing workflow is CLI-only: automatic
//! dependency installation mutates interpreter-wide state and is not safe
//! to run concurrently per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::config::PaperforgeConfig;
use crate::pipeline::{PipelineRunner, run_with_events};
use crate::progress::{ProgressReceiver, ProgressStream};
use crate::store::{ArtifactStore, LocalArtifactStore};

/// Concurrent pipeline runs served at once; further requests queue.
pub const WORKER_POOL_SIZE: usize = 4;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub port: u16,
    pub config: PaperforgeConfig,
}

pub struct AppState {
    config: PaperforgeConfig,
    papers: Mutex<HashMap<String, String>>,
    store: Arc<LocalArtifactStore>,
    pool: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: PaperforgeConfig) -> Self {
        let store = Arc::new(LocalArtifactStore::new(config.output_dir.clone()));
        Self {
            config,
            papers: Mutex::new(HashMap::new()),
            store,
            pool: Arc::new(Semaphore::new(WORKER_POOL_SIZE)),
        }
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/papers", post(upload_paper))
        .route("/generate/{paper_id}", get(generate))
        .route("/download/{project_id}", get(download))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Accept extracted paper text and store it under a fresh id. Byte-to-text
/// extraction for binary formats happens before this boundary.
async fn upload_paper(State(state): State<Arc<AppState>>, body: String) -> Response {
    if body.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "paper text must not be empty" })),
        )
            .into_response();
    }

    let paper_id = Uuid::new_v4().to_string();
    state.papers.lock().await.insert(paper_id.clone(), body);

    Json(json!({
        "paper_id": paper_id,
        "message": "Paper stored successfully",
    }))
    .into_response()
}

/// Run the pipeline for a stored paper, streaming progress as
/// newline-delimited JSON until the terminal event.
async fn generate(
    State(state): State<Arc<AppState>>,
    Path(paper_id): Path<String>,
) -> Response {
    let Some(paper) = state.papers.lock().await.get(&paper_id).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Paper {} not found", paper_id) })),
        )
            .into_response();
    };

    let (tx, rx) = ProgressStream::with_heartbeat(Duration::from_secs(state.config.heartbeat_secs));
    let runner = PipelineRunner::from_config(&state.config, state.store.clone())
        .with_events(tx.clone());

    let pool = state.pool.clone();
    tokio::spawn(async move {
        // Hold a worker-pool permit for the whole run.
        let _permit = pool.acquire_owned().await;
        run_with_events(runner, paper, tx).await;
    });

    ndjson_response(rx)
}

/// Stream events off a progress receiver as one JSON object per line.
/// Dropping the response (client disconnect) drops the receiver, which
/// cancels the heartbeat task; the pipeline itself runs to completion and
/// still persists its artifacts.
fn ndjson_response(rx: ProgressReceiver) -> Response {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.next_event()
            .await
            .map(|event| (Ok::<_, std::convert::Infallible>(event.to_json_line()), rx))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Look up the stored location of a persisted project.
async fn download(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Response {
    match state.store.lookup(&project_id).await {
        Some(location) => Json(json!({
            "project_id": project_id,
            "location": location,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Project {} not found", project_id) })),
        )
            .into_response(),
    }
}

/// Start the HTTP server.
pub async fn start_server(server_config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(server_config.config));
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("paperforge serving at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        eprintln!("[server] failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
