//! Shared fixtures for the integration tests.
//!
//! Every server runs on its own thread with a current-thread runtime, so the engine under
//! test (which owns a separate runtime) never shares an event loop with its peer.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::DefaultBodyLimit,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const PASSWORD: &str = "abracadabra";
pub const STREAM_CHUNKS: usize = 5;

/// Install a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A running axum server.
pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the echo/password/slow server on a random port.
pub fn spawn_server() -> TestServer {
    let addr = spawn_on_thread(|listener| async move {
        axum::serve(listener, router()).await
    });
    TestServer { addr }
}

fn router() -> Router {
    Router::new()
        .route("/", get(password))
        .route("/echo", post(echo))
        .route("/sleep", get(slow))
        .route("/json", get(json))
        .route("/stream", get(stream))
        .route("/agent", get(agent))
        .layer(DefaultBodyLimit::disable())
}

/// 403 without the password header, 503 for Apache user agents, otherwise `Success`.
async fn password(headers: HeaderMap) -> Response {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if agent.contains("Apache") {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match headers.get("password") {
        Some(value) if value == PASSWORD => "Success".into_response(),
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

/// Echo the body back with the request's content type.
async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/plain"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(1000)).await;
    "Success"
}

async fn json() -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"message":"hi","count":3}"#,
    )
        .into_response()
}

/// `chunk-0;chunk-1;...` with a short pause before each chunk.
async fn stream() -> Body {
    let chunks = futures::stream::iter(0..STREAM_CHUNKS).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, Infallible>(format!("chunk-{i};"))
    });
    Body::from_stream(chunks)
}

async fn agent(headers: HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn expected_stream_body() -> String {
    (0..STREAM_CHUNKS).map(|i| format!("chunk-{i};")).collect()
}

/// A peer that reads each request head, writes `reply` verbatim, and closes the connection.
pub fn raw_peer(reply: &'static [u8]) -> SocketAddr {
    spawn_on_thread(move |listener| serve_raw(listener, reply))
}

async fn serve_raw(listener: tokio::net::TcpListener, reply: &'static [u8]) -> std::io::Result<()> {
    loop {
        let (mut socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let _ = socket.write_all(reply).await;
            let _ = socket.shutdown().await;
        });
    }
}

/// A keep-alive peer answering `ok` to every request, after one second for paths
/// containing `/slow`. The counter tracks accepted connections.
pub fn keep_alive_peer() -> (SocketAddr, Arc<AtomicUsize>) {
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    let addr = spawn_on_thread(move |listener| serve_keep_alive(listener, counter));
    (addr, accepts)
}

async fn serve_keep_alive(
    listener: tokio::net::TcpListener,
    accepts: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    loop {
        let (mut socket, _) = listener.accept().await?;
        accepts.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut pending: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") else {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => pending.extend_from_slice(&buf[..n]),
                    }
                    continue;
                };
                let head: Vec<u8> = pending.drain(..end + 4).collect();
                let request_line = String::from_utf8_lossy(&head);
                if request_line.lines().next().unwrap_or_default().contains("/slow") {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                let reply = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";
                if socket.write_all(reply).await.is_err() {
                    return;
                }
            }
        });
    }
}

/// Status line and headers for a chunked response, then one chunk, then EOF.
pub const PARTIAL_CHUNKED: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n";

/// Declares 100 bytes, sends 5.
pub const SHORT_CONTENT_LENGTH: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\nhello";

/// Stops in the middle of the header block.
pub const PARTIAL_HEADERS: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/pl";

/// Closes without a single response byte.
pub const NOTHING: &[u8] = b"";

/// Not an HTTP status line.
pub const MALFORMED_STATUS: &[u8] = b"HTP/1.1 abc\r\n\r\n";

/// An address nothing listens on.
pub fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    fastrand::fill(&mut data);
    data
}

fn spawn_on_thread<F, Fut>(serve: F) -> SocketAddr
where
    F: FnOnce(tokio::net::TcpListener) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            serve(listener).await
        })
        .unwrap();
    });
    addr
}
