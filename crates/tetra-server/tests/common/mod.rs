//! Helpers shared by the integration test binaries.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::response::Response;
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use http::{Method, Request};
use http_body_util::BodyExt;
use tetra_server::AppState;
use tetra_server::config::ServerConfig;
use tetra_server::executor::WorkerCommand;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

pub type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn config(pool_size: usize, compute_timeout_secs: u64) -> ServerConfig {
    ServerConfig {
        pool_size,
        compute_timeout_secs,
        headless: true,
        ..ServerConfig::default()
    }
}

/// The crate's own binary in worker mode.
pub fn real_worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_tetra-server")).arg("worker")
}

#[cfg(unix)]
pub fn shell_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("/bin/sh").arg("-c").arg(script.to_string())
}

/// Every compute fails at spawn; nothing downstream of decode succeeds.
pub fn unlaunchable_worker() -> WorkerCommand {
    WorkerCommand::new("/nonexistent/tetra-worker-binary")
}

pub fn state(worker: WorkerCommand) -> AppState {
    AppState::new(&config(4, 60), worker)
}

pub async fn call(router: &Router, method: Method, uri: &str, body: impl Into<Body>) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(body.into())
        .expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible")
}

pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("response body should collect")
        .to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("response should be JSON")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A router served on an ephemeral local port, stopped on drop.
pub struct TestServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    /// `None` where the sandbox forbids binding sockets.
    pub async fn start(router: Router) -> Option<Self> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                eprintln!("skipping: cannot bind a local socket here ({err})");
                return None;
            }
            Err(err) => panic!("listener should bind: {err}"),
        };
        let addr = listener.local_addr().expect("bound listener has an address");
        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("test server should run");
        });
        Some(Self { addr, task })
    }

    pub async fn viewer(&self) -> Viewer {
        let (socket, _response) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket client should connect");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn next_frame(viewer: &mut Viewer) -> WsMessage {
    tokio::time::timeout(Duration::from_secs(5), viewer.next())
        .await
        .expect("a frame should arrive")
        .expect("socket should stay open")
        .expect("frame should decode")
}
