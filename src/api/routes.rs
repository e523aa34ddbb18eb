//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{delete, get, post},
    Router,
};
use futures::stream::Stream;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::producer::{build_producer, ProducerRef};
use crate::stream::StreamEncoder;
use crate::task::{GenerationTask, TaskError, TaskRegistry, TaskSnapshot};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Every live generation task
    pub registry: TaskRegistry,
    /// Producer used for every artifact of every task
    pub producer: ProducerRef,
    pub encoder: StreamEncoder,
}

impl AppState {
    pub fn new(config: Config, producer: ProducerRef) -> Self {
        let encoder = StreamEncoder::new(config.stream_retry, config.frame_pause);
        Self {
            config,
            registry: TaskRegistry::new(),
            producer,
            encoder,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: TaskError) -> ApiError {
    let status = match &err {
        TaskError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        TaskError::DuplicateStream(_) | TaskError::InvalidTransition { .. } => StatusCode::CONFLICT,
        TaskError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TaskError::Producer(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(err.to_string())))
}

/// Build the API router over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/stream/:task_id", get(stream_artifacts))
        .route("/api/abort/:task_id", delete(abort_generation))
        .route("/api/tasks/:task_id", get(get_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let producer = build_producer(&config.producer, config.exclusive_producer);
    tracing::info!(
        producer = producer.name(),
        exclusive = config.exclusive_producer,
        "Artifact producer ready"
    );

    let state = Arc::new(AppState::new(config.clone(), producer));
    let sweeper = spawn_idle_sweeper(
        state.registry.clone(),
        config.sweep_interval,
        config.task_ttl,
    );

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    sweeper.abort();
    Ok(())
}

/// Periodically drop tasks nobody streamed or aborted within `ttl`.
fn spawn_idle_sweeper(registry: TaskRegistry, interval: Duration, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = registry.sweep_idle(ttl);
            if removed > 0 {
                tracing::info!(removed, "Swept idle generation tasks");
            }
        }
    })
}

/// Wait for shutdown signal and abort in-flight tasks so open streams drain.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, aborting running generation tasks...");

    let aborted = state.registry.abort_all();
    if aborted == 0 {
        tracing::info!("No running generation tasks to abort");
    } else {
        tracing::info!("Marked {} generation tasks for abortion", aborted);
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_tasks: state.registry.len(),
        producer: state.producer.name().to_string(),
    })
}

/// Produce the first artifact synchronously and register the task.
async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let subject = req.subject.trim();
    if subject.is_empty() {
        return Err(api_error(TaskError::InvalidRequest(
            "Subject must not be empty".to_string(),
        )));
    }

    let mut task = GenerationTask::new(
        state.registry.clone(),
        Arc::clone(&state.producer),
        subject,
    );
    let first = task.start_first().await.map_err(api_error)?;

    Ok(Json(GenerateResponse {
        status: "success".to_string(),
        task_id: first.task_id,
        artifact_ref: first.artifact_ref,
    }))
}

/// Stream the remaining artifacts via SSE.
async fn stream_artifacts(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut task = GenerationTask::attach(
        state.registry.clone(),
        Arc::clone(&state.producer),
        &task_id,
        query.subject,
    )
    .map_err(|e| {
        tracing::warn!(task_id = %task_id, "Cannot stream: {}", e);
        api_error(e)
    })?;

    let total = query.total.unwrap_or(state.config.default_total);
    if total == 0 || total > state.config.max_total {
        return Err(api_error(TaskError::InvalidRequest(format!(
            "Total must be between 1 and {}",
            state.config.max_total
        ))));
    }

    if let Err(e) = task.begin_streaming(total) {
        tracing::warn!(task_id = %task_id, "Cannot stream: {}", e);
        return Err(api_error(e));
    }

    Ok(Sse::new(state.encoder.encode(task.into_events())))
}

/// Request cooperative cancellation of a task.
async fn abort_generation(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    tracing::info!(task_id = %task_id, "Received abort request");

    match state.registry.set_active(&task_id, false) {
        Ok(total_generated) => {
            tracing::info!(task_id = %task_id, total_generated, "Generation task marked for abortion");
            Ok(Json(AbortResponse {
                status: "success".to_string(),
                message: format!("Generation task {} aborted", task_id),
                total_generated,
            }))
        }
        Err(e) => {
            tracing::warn!(task_id = %task_id, "Task not found or already completed");
            Err(api_error(e))
        }
    }
}

/// Get a snapshot of a live task.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    state.registry.get(&task_id).map(Json).map_err(api_error)
}
