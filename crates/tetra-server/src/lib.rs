pub mod config;
pub mod executor;
pub mod frontend;
pub mod registry;
pub mod reload;
pub mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tetra_mesh::demo::unit_cube;
use tetra_mesh::{CodecError, Mesh, PostProcessError, TetraOptions, codec, explode_for_display};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::executor::{ComputeError, ComputeExecutor, WorkerCommand};
use crate::frontend::Frontend;
use crate::registry::{ConnectionRegistry, Notification, OUTBOX_CAPACITY};

const MESH_CONTENT_TYPE: &str = "application/octet-stream";

/// Handles shared by every request.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    executor: ComputeExecutor,
    registry: ConnectionRegistry,
    options: TetraOptions,
    explode_factor: f64,
    compute_timeout: Option<Duration>,
    max_body_bytes: usize,
    log_timing: bool,
}

impl AppState {
    pub fn new(config: &ServerConfig, worker: WorkerCommand) -> Self {
        Self {
            inner: Arc::new(Shared {
                executor: ComputeExecutor::new(worker, config.pool_size),
                registry: ConnectionRegistry::new(),
                options: config.tetra_options(),
                explode_factor: config.explode_factor,
                compute_timeout: config.compute_timeout(),
                max_body_bytes: config.max_body_bytes,
                log_timing: config.log_timing,
            }),
        }
    }

    pub fn executor(&self) -> &ComputeExecutor {
        &self.inner.executor
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    fn options_for(&self, query: &TetraQuery) -> Result<TetraOptions, ApiError> {
        let defaults = self.inner.options;
        let options = TetraOptions {
            edge_length_fac: query.edge_length_fac.unwrap_or(defaults.edge_length_fac),
            optimize: query.optimize.unwrap_or(defaults.optimize),
        };
        options
            .validate()
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        Ok(options)
    }

    /// Submit, post-process, encode. Viewers hear about the outcome either
    /// way.
    async fn tetrahedralize(&self, mesh: Mesh, options: TetraOptions) -> Result<Bytes, ApiError> {
        let result = self.run_pipeline(mesh, options).await;
        match &result {
            Ok(payload) => {
                self.registry().broadcast_bytes(payload.clone());
            }
            Err(err) => {
                let notice = json!({ "event": "error", "detail": err.detail });
                self.registry().broadcast_text(notice.to_string());
            }
        }
        result
    }

    async fn run_pipeline(&self, mesh: Mesh, options: TetraOptions) -> Result<Bytes, ApiError> {
        let grid = self
            .executor()
            .submit(mesh, options, self.inner.compute_timeout)
            .await
            .map_err(|err| match err {
                ComputeError::Timeout(_) => ApiError::timed_out(),
                ComputeError::Failure(_) => ApiError::compute_failed(),
            })?;

        let factor = self.inner.explode_factor;
        let encoded = tokio::task::spawn_blocking(move || {
            let surface = explode_for_display(&grid, factor)?;
            Ok::<_, PostProcessError>(codec::encode(&surface)?)
        })
        .await
        .map_err(|err| {
            error!(%err, "post-processing task did not complete");
            ApiError::internal("post-processing was interrupted")
        })?
        .map_err(ApiError::from)?;

        debug!(bytes = encoded.len(), "encoded display mesh");
        Ok(Bytes::from(encoded))
    }
}

pub fn app(state: AppState) -> Router {
    router(state, None)
}

/// Same API, plus the prebuilt UI.
pub fn app_with_frontend(state: AppState, frontend: &Frontend) -> Router {
    router(state, Some(frontend))
}

fn router(state: AppState, frontend: Option<&Frontend>) -> Router {
    let log_timing = state.inner.log_timing;
    let body_limit = DefaultBodyLimit::max(state.inner.max_body_bytes);
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/gen-tetra", post(gen_tetra).layer(body_limit))
        .route("/get-demo", get(get_demo))
        .route("/ws", get(websocket))
        .with_state(state);
    if let Some(frontend) = frontend {
        router = frontend.mount(router);
    }

    let router = router.layer(cors_layer());
    if log_timing {
        router.layer(middleware::from_fn(log_request_timing))
    } else {
        router
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
}

async fn log_request_timing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request completed"
    );
    response
}

#[derive(Debug, Default, Deserialize)]
struct TetraQuery {
    edge_length_fac: Option<f64>,
    optimize: Option<bool>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn payload_too_large(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }

    fn compute_failed() -> Self {
        Self::internal("Failed to tetrahedralize")
    }

    fn timed_out() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            detail: "Tetrahedralization timed out".to_string(),
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        let detail = rejection.body_text();
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!(%detail, "rejected oversized mesh upload");
            Self::payload_too_large(detail)
        } else {
            Self::bad_request(detail)
        }
    }
}

impl From<PostProcessError> for ApiError {
    fn from(err: PostProcessError) -> Self {
        match err {
            PostProcessError::Codec(err @ CodecError::UnsupportedTopology { .. }) => {
                Self::bad_request(err.to_string())
            }
            other => {
                error!(%other, "post-processing failed");
                Self::internal("Failed to post-process mesh")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

fn mesh_response(payload: Bytes) -> Response {
    ([(CONTENT_TYPE, MESH_CONTENT_TYPE)], payload).into_response()
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn gen_tetra(
    State(state): State<AppState>,
    query: Result<Query<TetraQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let body = body?;
    let options = state.options_for(&query)?;
    let mesh = codec::decode(&body).map_err(|err| {
        warn!(%err, bytes = body.len(), "rejected mesh upload");
        ApiError::bad_request(format!("invalid mesh: {err}"))
    })?;
    info!(
        vertices = mesh.vertices.len(),
        triangles = mesh.triangles.len(),
        "tetrahedralizing uploaded mesh"
    );

    let payload = state.tetrahedralize(mesh, options).await?;
    Ok(mesh_response(payload))
}

async fn get_demo(State(state): State<AppState>) -> Result<Response, ApiError> {
    let options = state.inner.options;
    let payload = state.tetrahedralize(unit_cube(), options).await?;
    Ok(mesh_response(payload))
}

async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let registry = state.registry().clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, registry))
}

/// Inbound frames are ignored apart from close; outbound notifications are
/// written by a dedicated task fed from the registry.
async fn handle_websocket(socket: WebSocket, registry: ConnectionRegistry) {
    let (mut sink, mut stream) = socket.split();
    let (sender, mut outbox) = mpsc::channel(OUTBOX_CAPACITY);
    let id = registry.connect(sender);

    let mut writer = tokio::spawn(async move {
        while let Some(notification) = outbox.recv().await {
            let message = match notification {
                Notification::Text(text) => Message::Text(text.into()),
                Notification::Binary(bytes) => Message::Binary(bytes),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    registry.disconnect(id);
    writer.abort();
}
