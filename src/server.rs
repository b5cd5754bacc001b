//! HTTP API for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner with lifecycle status |
//! | `GET`  | `/health` | 200 when ready, 503 while initializing or after a failed start |
//! | `POST` | `/query` | Answer a question with sources |
//!
//! # Startup
//!
//! [`run_server`] binds the listener first and builds the pipeline in a
//! background task. Until that task finishes the orchestrator is
//! uninitialized and `/query` answers 503; if it fails, the reason is kept
//! and reported in every 503 body.
//!
//! # Error Contract
//!
//! ```json
//! { "detail": "question must not be empty" }
//! ```
//!
//! `400` for an invalid question or a body that is not a query object,
//! `503` when the pipeline is not ready.
//! Every other failure is a 200 with `"status": "error"` in the body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! chat clients.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::models::ChatMessage;
use crate::pipeline::{Orchestrator, Pipeline};
use crate::response::QueryResponse;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    /// Used when a request omits `use_reranking`.
    default_use_reranking: bool,
}

/// Starts the HTTP server on `[server].bind` and initializes the pipeline
/// in the background.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::new());

    let init_config = config.clone();
    let init_target = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        match Pipeline::build(&init_config).await {
            Ok(pipeline) => {
                init_target.initialize(pipeline);
                tracing::info!("pipeline initialized; accepting queries");
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "pipeline initialization failed");
                init_target.fail(format!("{:#}", e));
            }
        }
    });

    run_server_with_orchestrator(
        &config.server.bind,
        orchestrator,
        config.retrieval.use_reranking,
    )
    .await
}

/// Serves an existing orchestrator, ready or not.
///
/// Used by [`run_server`] and by tests that install their own pipeline.
pub async fn run_server_with_orchestrator(
    bind_addr: &str,
    orchestrator: Arc<Orchestrator>,
    default_use_reranking: bool,
) -> anyhow::Result<()> {
    let app = router(orchestrator, default_use_reranking);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("HaleAI server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(orchestrator: Arc<Orchestrator>, default_use_reranking: bool) -> Router {
    let state = AppState {
        orchestrator,
        default_use_reranking,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            // The orchestrator folds everything else into an answer; keep
            // the body generic if one ever escapes.
            _ => {
                return AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: err.class().to_string(),
                }
            }
        };
        AppError {
            status,
            detail: err.to_string(),
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============ Handlers ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    status: &'static str,
    docs: &'static str,
}

async fn handle_root(State(state): State<AppState>) -> Json<RootResponse> {
    let status = if state.orchestrator.is_ready() {
        "online"
    } else if state.orchestrator.startup_error().is_some() {
        "error"
    } else {
        "initializing"
    };
    Json(RootResponse {
        message: "HaleAI Medical Chatbot API",
        version: env!("CARGO_PKG_VERSION"),
        status,
        docs: "POST /query {\"question\": \"...\", \"history\": [], \"use_reranking\": true}",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    if !state.orchestrator.is_ready() {
        return Err(Error::NotReady(state.orchestrator.startup_error()).into());
    }
    Ok(Json(HealthResponse {
        status: "healthy",
        message: "Medical chatbot is running",
        timestamp: timestamp(),
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    #[serde(default)]
    use_reranking: Option<bool>,
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = body.map_err(|rejection| AppError {
        status: StatusCode::BAD_REQUEST,
        detail: format!("invalid request body: {}", rejection.body_text()),
    })?;
    let use_reranking = req.use_reranking.unwrap_or(state.default_use_reranking);
    let answer = state
        .orchestrator
        .answer_query(&req.question, req.history, use_reranking)
        .await?;
    Ok(Json(QueryResponse::from(answer)))
}
