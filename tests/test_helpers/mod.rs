//! Fake MCP servers hosted with axum for HTTP transport tests.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SESSION_HEADER: &str = "mcp-session-id";
const SESSION_ID: &str = "session-1";

/// Observations recorded by a fake server.
#[derive(Default)]
pub struct FakeState {
    /// Set once the client deletes its streamable HTTP session.
    pub session_terminated: AtomicBool,
    /// Streamable HTTP posts that arrived without the session header.
    pub requests_without_session: AtomicUsize,
    /// When set, session deletion never answers.
    pub stall_session_delete: AtomicBool,
    methods: Mutex<Vec<String>>,
    sse_sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sse_receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl FakeState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sse_sender: Mutex::new(Some(sender)),
            sse_receiver: Mutex::new(Some(receiver)),
            ..Self::default()
        }
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.methods
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, message: &Value) {
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            self.methods
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(method.to_owned());
        }
    }
}

/// A fake server listening on a local port.
pub struct FakeServer {
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// Shared observations.
    pub state: Arc<FakeState>,
    task: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeServer {
    /// Starts a server exposing `/mcp` (streamable HTTP) plus `/sse` and
    /// `/messages` (legacy HTTP+SSE). `/overloaded` fails every post with a
    /// large body.
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::new());
        let router = Router::new()
            .route("/mcp", post(streamable_post).delete(streamable_delete))
            .route("/sse", get(sse_stream))
            .route("/messages", post(sse_post))
            .route("/overloaded", post(overloaded_post))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("fake server should run");
        });
        Self {
            base_url: format!("http://{address}"),
            state,
            task,
        }
    }

    /// URL of the named path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Frames a scripted MCP server sends in answer to `message`.
fn answer(message: &Value) -> Vec<Value> {
    let id = message.get("id").cloned().unwrap_or(Value::Null);
    if id.is_null() {
        return Vec::new();
    }
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    match message.get("method").and_then(Value::as_str) {
        Some("initialize") => vec![result(
            &id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "1.0.0"}
            }),
        )],
        Some("tools/list") => {
            let page = if params.get("cursor").and_then(Value::as_str) == Some("page-2") {
                json!({
                    "tools": [{
                        "name": "write",
                        "description": "Writes",
                        "inputSchema": {"type": "object"}
                    }]
                })
            } else {
                json!({
                    "tools": [{
                        "name": "echo",
                        "description": "Echoes",
                        "inputSchema": {"type": "object"}
                    }],
                    "nextCursor": "page-2"
                })
            };
            vec![result(&id, page)]
        }
        Some("tools/call") => call_tool(&id, &params),
        _ => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "method not found"}
        })],
    }
}

fn call_tool(id: &Value, params: &Value) -> Vec<Value> {
    let token = params
        .get("_meta")
        .and_then(|meta| meta.get("progressToken"))
        .cloned()
        .unwrap_or(Value::Null);
    let progress = json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {"progressToken": token, "progress": 1, "total": 2}
    });
    match params.get("name").and_then(Value::as_str) {
        Some("echo") => {
            let text = params
                .get("arguments")
                .and_then(|arguments| arguments.get("text"))
                .cloned()
                .unwrap_or(Value::Null);
            vec![
                progress,
                result(id, json!({"content": [{"type": "text", "text": text}]})),
            ]
        }
        Some("broken") => vec![result(
            id,
            json!({"content": [{"type": "text", "text": "tool failed"}], "isError": true}),
        )],
        _ => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": "unknown tool"}
        })],
    }
}

fn event_stream_body(frames: &[Value]) -> String {
    frames
        .iter()
        .map(|frame| format!("event: message\ndata: {frame}\n\n"))
        .collect()
}

async fn streamable_post(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Response {
    state.record(&message);
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    if method == "initialize" {
        let frames = answer(&message);
        let body = frames.into_iter().next().unwrap_or(Value::Null);
        return ([(SESSION_HEADER, SESSION_ID)], Json(body)).into_response();
    }
    let has_session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some(SESSION_ID);
    if !has_session {
        state.requests_without_session.fetch_add(1, Ordering::SeqCst);
        return StatusCode::BAD_REQUEST.into_response();
    }
    let frames = answer(&message);
    if method == "tools/call" {
        return (
            [(CONTENT_TYPE, "text/event-stream")],
            event_stream_body(&frames),
        )
            .into_response();
    }
    match frames.into_iter().next() {
        Some(frame) => Json(frame).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn streamable_delete(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> StatusCode {
    if state.stall_session_delete.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
    let has_session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some(SESSION_ID);
    if has_session {
        state.session_terminated.store(true, Ordering::SeqCst);
    }
    StatusCode::OK
}

async fn sse_stream(State(state): State<Arc<FakeState>>) -> Response {
    let receiver = state
        .sse_receiver
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let body = async_stream::stream! {
        yield Ok::<_, Infallible>(String::from("event: endpoint\ndata: /messages?sessionId=1\n\n"));
        if let Some(mut frames) = receiver {
            while let Some(frame) = frames.recv().await {
                yield Ok(format!("event: message\ndata: {frame}\n\n"));
            }
        }
    };
    (
        [(CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn sse_post(State(state): State<Arc<FakeState>>, Json(message): Json<Value>) -> StatusCode {
    state.record(&message);
    let tool = message
        .get("params")
        .and_then(|params| params.get("name"))
        .and_then(Value::as_str);
    if tool == Some("stall") {
        std::future::pending::<()>().await;
    }
    let sender = state
        .sse_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(channel) = sender {
        for frame in answer(&message) {
            drop(channel.send(frame.to_string()));
        }
    }
    StatusCode::ACCEPTED
}

/// Size of the `/overloaded` error body in bytes.
pub const OVERLOADED_BODY_LEN: usize = 1_000_000;

async fn overloaded_post() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(OVERLOADED_BODY_LEN)).into_response()
}
