//! HTTP surface for the match engine.
//!
//! - `POST /api/session/init` creates a session and returns its id
//! - `POST /api/process` runs one query through the engine
//! - `DELETE /api/session/{id}` drops a session
//! - `GET /health`
//!
//! Engine calls block on the embedding and chat endpoints, so they run on
//! tokio's blocking pool.

#[cfg(feature = "http-server")]
mod http {
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;
    use tower_http::cors::CorsLayer;
    use tracing::{error, info, warn};

    use crate::corpus::Step;
    use crate::error::MatchError;
    use crate::matching::{MatchEngine, MatchResult, MatchStatus};
    use crate::session::{SessionId, SessionSweeper};

    #[derive(Clone)]
    struct AppState {
        engine: Arc<MatchEngine>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct InitResponse {
        pub session_id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct ProcessRequest {
        pub session_id: String,
        pub text: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TaskView {
        pub task_id: String,
        pub title: String,
    }

    #[derive(Debug, Serialize)]
    pub struct ProcessResponse {
        pub status: MatchStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub task: Option<TaskView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub step: Option<Step>,
        pub reply: String,
    }

    impl From<&MatchResult> for ProcessResponse {
        fn from(result: &MatchResult) -> Self {
            Self {
                status: result.status(),
                task: result.task().map(|task| TaskView {
                    task_id: task.id.to_string(),
                    title: task.title.clone(),
                }),
                step: result.step().cloned(),
                reply: result.reply(),
            }
        }
    }

    #[derive(Debug, Serialize)]
    struct ErrorBody {
        error: String,
        code: String,
        suggestions: Vec<&'static str>,
    }

    enum ApiError {
        BadRequest(String),
        Engine(MatchError),
        Internal(String),
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let (status, body) = match self {
                Self::BadRequest(message) => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: message,
                        code: "BAD_REQUEST".to_string(),
                        suggestions: Vec::new(),
                    },
                ),
                Self::Engine(e) => {
                    let status = match &e {
                        MatchError::Embedding(_) => StatusCode::BAD_GATEWAY,
                        _ => StatusCode::INTERNAL_SERVER_ERROR,
                    };
                    (
                        status,
                        ErrorBody {
                            error: e.to_string(),
                            code: e.status_code(),
                            suggestions: e.recovery_suggestions(),
                        },
                    )
                }
                Self::Internal(message) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: message,
                        code: "INTERNAL_ERROR".to_string(),
                        suggestions: Vec::new(),
                    },
                ),
            };
            (status, Json(body)).into_response()
        }
    }

    /// Routes with permissive CORS.
    pub fn router(engine: Arc<MatchEngine>) -> Router {
        Router::new()
            .route("/api/session/init", post(init_session))
            .route("/api/process", post(process))
            .route("/api/session/{id}", delete(clear_session))
            .route("/health", get(health_check))
            .layer(CorsLayer::permissive())
            .with_state(AppState { engine })
    }

    async fn health_check() -> &'static str {
        "OK"
    }

    async fn init_session(State(state): State<AppState>) -> Json<InitResponse> {
        let id = SessionId::generate();
        state.engine.sessions().init(&id);
        info!("Session {id} initialized");
        Json(InitResponse {
            session_id: id.to_string(),
        })
    }

    async fn process(
        State(state): State<AppState>,
        Json(request): Json<ProcessRequest>,
    ) -> Result<Json<ProcessResponse>, ApiError> {
        if request.session_id.trim().is_empty() {
            return Err(ApiError::BadRequest("Missing session_id".to_string()));
        }
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(ApiError::BadRequest("Missing text".to_string()));
        }

        let engine = state.engine;
        let id = SessionId::from(request.session_id);
        let response = tokio::task::spawn_blocking(move || {
            let result = engine.process(&id, &text)?;
            let response = ProcessResponse::from(&result);
            if let Err(e) = engine.sessions().save_history(&id, text, &response.reply) {
                warn!("Could not save history for {id}: {e}");
            }
            Ok::<_, MatchError>(response)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Processing task failed: {e}")))?
        .map_err(|e| {
            error!("Processing failed: {e}");
            ApiError::Engine(e)
        })?;

        Ok(Json(response))
    }

    async fn clear_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
        if state.engine.sessions().clear_session(&SessionId::from(id)) {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    }

    /// Serves until ctrl-c, sweeping expired sessions in the background.
    pub async fn serve(
        engine: Arc<MatchEngine>,
        bind: String,
        sweep_interval: std::time::Duration,
    ) -> anyhow::Result<()> {
        let ct = CancellationToken::new();
        let sweeper = SessionSweeper::new(Arc::clone(engine.sessions()), sweep_interval);
        let sweeper_handle = tokio::spawn(sweeper.run(ct.clone()));

        let listener = tokio::net::TcpListener::bind(&bind).await?;
        info!("Listening on http://{bind}");
        eprintln!("stepguide listening on http://{bind}");
        eprintln!("Health check: http://{bind}/health");
        eprintln!("Press Ctrl+C to stop the server");

        let server = axum::serve(listener, router(engine));

        tokio::select! {
            result = server => {
                ct.cancel();
                result?;
            }
            _ = shutdown_signal() => {
                eprintln!("Shutting down HTTP server...");
                ct.cancel();
            }
        }

        if let Err(e) = sweeper_handle.await {
            warn!("Session sweeper ended abnormally: {e}");
        }
        eprintln!("HTTP server shut down gracefully");
        Ok(())
    }
}

#[cfg(feature = "http-server")]
pub use http::{InitResponse, ProcessRequest, ProcessResponse, TaskView, router, serve};

#[cfg(not(feature = "http-server"))]
pub async fn serve(
    _engine: std::sync::Arc<crate::matching::MatchEngine>,
    _bind: String,
    _sweep_interval: std::time::Duration,
) -> anyhow::Result<()> {
    anyhow::bail!(
        "HTTP server support is not compiled in.\nSuggestion: Rebuild with: cargo build --features http-server"
    )
}
