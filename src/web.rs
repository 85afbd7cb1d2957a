use crate::{
    config::DaemonConfig,
    semantic::{ClusterError, ClusteringService},
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<ClusteringService>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterRequest {
    pub keys: Vec<String>,

    /// Merge threshold on cosine distance [0.0, 1.0].
    ///
    /// *Falls back to the daemon's configured default (0.4 out of the box)*
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterResponse {
    pub clusters: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

pub fn router(service: Arc<ClusteringService>, max_body_bytes: usize) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/cluster_keys", post(cluster_keys))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(service: Arc<ClusteringService>, config: DaemonConfig) -> anyhow::Result<()> {
    if config.preload {
        log::info!("preloading text encoder before accepting requests");
        let preload = service.clone();
        tokio::task::spawn_blocking(move || preload.initialize()).await??;
    }

    let app = router(service, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    log::info!("listening on {}", config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("received Ctrl+C, shutting down"),
        _ = terminate => log::warn!("received SIGTERM, shutting down"),
    }
}

pub fn start_daemon(service: Arc<ClusteringService>, config: DaemonConfig) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service, config))
}

#[derive(Debug)]
enum HttpError {
    Cluster(ClusterError),
    BadBody(JsonRejection),
    Worker(tokio::task::JoinError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            HttpError::Cluster(err @ ClusterError::Validation(_)) => {
                log::warn!("rejected request: {err}");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            HttpError::Cluster(err @ ClusterError::Infrastructure(_)) => {
                log::error!("{self:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Clustering failed: {err}"),
                )
            }
            HttpError::Cluster(err @ ClusterError::DeadlineExceeded(_)) => {
                log::error!("{self:?}");
                (StatusCode::REQUEST_TIMEOUT, err.to_string())
            }
            HttpError::BadBody(rejection) => {
                log::warn!("rejected request body: {rejection}");
                (StatusCode::BAD_REQUEST, rejection.body_text())
            }
            HttpError::Worker(err) => {
                log::error!("{self:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Clustering failed: {err}"),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ClusterError> for HttpError {
    fn from(err: ClusterError) -> Self {
        Self::Cluster(err)
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadBody(rejection)
    }
}

impl From<tokio::task::JoinError> for HttpError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err)
    }
}

async fn cluster_keys(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<ClusterRequest>, JsonRejection>,
) -> Result<Json<ClusterResponse>, HttpError> {
    let Json(payload) = payload?;
    log::debug!(
        "payload: {} keys, threshold {:?}",
        payload.keys.len(),
        payload.threshold
    );

    let service = state.service.clone();
    let threshold = payload.threshold.unwrap_or_else(|| service.default_threshold());

    let clusters =
        tokio::task::spawn_blocking(move || service.cluster(&payload.keys, threshold)).await??;

    Ok(Json(ClusterResponse { clusters }))
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.service.health().loaded,
    })
}
