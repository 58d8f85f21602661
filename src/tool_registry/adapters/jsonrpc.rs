//! JSON-RPC 2.0 envelopes and request routing for MCP sessions.
//!
//! [`RpcRouter`] correlates responses and progress notifications with the
//! calls waiting for them. Transports that keep one long-lived inbound
//! channel (process pipes, SSE streams) feed every decoded frame into
//! [`RpcRouter::route`] and drain the outbound queue returned by
//! [`RpcRouter::new`] to the peer.

use crate::tool_registry::{
    domain::{
        DownstreamFault, InvocationEvent, McpToolDefinition, ProgressSignal, ToolCallRequest,
        ToolCallResult, TransportKind,
    },
    ports::{InvocationStream, ListToolsError, TransportError, TransportResult},
};
use futures::{Stream, StreamExt, stream};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

const JSONRPC_VERSION: &str = "2.0";
const METHOD_NOT_FOUND: i64 = -32_601;

/// Client identity and protocol revision announced during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
    /// MCP protocol revision.
    pub protocol_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: String::from(env!("CARGO_PKG_NAME")),
            version: String::from(env!("CARGO_PKG_VERSION")),
            protocol_version: String::from("2024-11-05"),
        }
    }
}

impl ClientInfo {
    pub(crate) fn initialize_params(&self) -> Value {
        json!({
            "protocolVersion": self.protocol_version,
            "capabilities": {},
            "clientInfo": {"name": self.name, "version": self.version},
        })
    }
}

/// Builds a request envelope.
pub(crate) fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params})
}

/// Builds a notification envelope.
pub(crate) fn notification(method: &str, params: Option<Value>) -> Value {
    let mut envelope = json!({"jsonrpc": JSONRPC_VERSION, "method": method});
    if let (Some(params_value), Some(object)) = (params, envelope.as_object_mut()) {
        object.insert(String::from("params"), params_value);
    }
    envelope
}

/// Builds `tools/call` params with the progress token set to the request id.
pub(crate) fn call_params(request: &ToolCallRequest, progress_token: u64) -> Value {
    json!({
        "name": request.tool_name(),
        "arguments": request.arguments(),
        "_meta": {"progressToken": progress_token},
    })
}

/// Builds a `notifications/cancelled` envelope.
pub(crate) fn cancellation(request_id: u64) -> Value {
    notification(
        "notifications/cancelled",
        Some(json!({"requestId": request_id, "reason": "request abandoned by client"})),
    )
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// Answer to one of our requests.
    Response {
        id: Option<u64>,
        outcome: Result<Value, DownstreamFault>,
    },
    /// Server-originated notification.
    Notification { method: String, params: Value },
    /// Server-originated request that expects an answer.
    Request { id: Value, method: String },
}

/// Classifies a frame; anything that is not a JSON-RPC 2.0 object is a
/// protocol violation.
pub(crate) fn classify(kind: TransportKind, frame: Value) -> TransportResult<Inbound> {
    let Value::Object(mut object) = frame else {
        return Err(TransportError::protocol(kind, "frame is not a JSON object"));
    };
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(TransportError::protocol(kind, "frame is not JSON-RPC 2.0"));
    }

    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let id = object.remove("id").filter(|value| !value.is_null());

    match (method, id) {
        (Some(method_name), Some(server_request_id)) => Ok(Inbound::Request {
            id: server_request_id,
            method: method_name,
        }),
        (Some(method_name), None) => Ok(Inbound::Notification {
            method: method_name,
            params: object.remove("params").unwrap_or(Value::Null),
        }),
        (None, id) => {
            let outcome = response_outcome(kind, &mut object)?;
            Ok(Inbound::Response {
                id: id.as_ref().and_then(request_id),
                outcome,
            })
        }
    }
}

fn response_outcome(
    kind: TransportKind,
    object: &mut Map<String, Value>,
) -> TransportResult<Result<Value, DownstreamFault>> {
    if let Some(result) = object.remove("result") {
        return Ok(Ok(result));
    }
    let Some(error) = object.remove("error") else {
        return Err(TransportError::protocol(
            kind,
            "response carries neither result nor error",
        ));
    };
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::protocol(kind, "error object has no integer code"))?;
    Ok(Err(DownstreamFault::RpcError {
        code,
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        data: error.get("data").cloned(),
    }))
}

fn request_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Turns a `tools/call` result into the terminal invocation event.
pub(crate) fn completion(outcome: Result<Value, DownstreamFault>) -> InvocationEvent {
    match outcome {
        Ok(payload) => {
            let result = ToolCallResult::new(payload);
            if result.is_error() {
                InvocationEvent::Rejected(DownstreamFault::ToolError {
                    payload: result.into_payload(),
                })
            } else {
                InvocationEvent::Completed(result)
            }
        }
        Err(fault) => InvocationEvent::Rejected(fault),
    }
}

/// Parses a `tools/list` result.
pub(crate) fn parse_tool_list(
    kind: TransportKind,
    result: &Value,
) -> TransportResult<Vec<McpToolDefinition>> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::protocol(kind, "tools/list result has no tools array"))?;
    tools
        .iter()
        .map(|tool| {
            let name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let schema = tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"}));
            McpToolDefinition::new(name, description, schema)
                .map_err(|err| TransportError::protocol(kind, err.to_string()))
        })
        .collect()
}

/// Builds the reply to a server-originated request.
pub(crate) fn reply_to(id: Value, method: &str) -> Value {
    if method == "ping" {
        return json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": {}});
    }
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {"code": METHOD_NOT_FOUND, "message": format!("method not found: {method}")},
    })
}

/// Progress token carried by a `notifications/progress` payload.
pub(crate) fn progress_token(params: &Value) -> Option<u64> {
    params.get("progressToken").and_then(request_id)
}

/// Message queued for delivery to the peer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outbound {
    /// Request id when the message expects a response.
    pub request_id: Option<u64>,
    /// JSON-RPC envelope.
    pub message: Value,
}

/// Item delivered to a waiting call.
#[derive(Debug)]
pub(crate) enum Routed {
    Progress(ProgressSignal),
    Response(Result<Value, DownstreamFault>),
}

type PendingSender = mpsc::UnboundedSender<TransportResult<Routed>>;

/// Correlates inbound frames with waiting calls.
#[derive(Debug)]
pub(crate) struct RpcRouter {
    kind: TransportKind,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingSender>>,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl RpcRouter {
    /// Creates a router and the receiver draining its outbound queue.
    pub(crate) fn new(kind: TransportKind) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Self {
            kind,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            outbound,
        });
        (router, outbound_rx)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the inbound channel has ended.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers a call and queues its request envelope.
    pub(crate) fn start(
        self: &Arc<Self>,
        method: &str,
        params: impl FnOnce(u64) -> Value,
    ) -> TransportResult<PendingCall> {
        if self.is_closed() {
            return Err(TransportError::closed(self.kind));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.pending().insert(id, sender);
        let call = PendingCall {
            id,
            router: Arc::clone(self),
            receiver,
            finished: false,
        };
        self.send(Outbound {
            request_id: Some(id),
            message: request(id, method, params(id)),
        })?;
        Ok(call)
    }

    /// Sends a request and waits for its response, ignoring progress.
    pub(crate) async fn call(
        self: &Arc<Self>,
        method: &str,
        params: Value,
    ) -> TransportResult<Result<Value, DownstreamFault>> {
        let mut call = self.start(method, |_| params)?;
        loop {
            match call.next_routed().await? {
                Routed::Progress(_) => {}
                Routed::Response(outcome) => return Ok(outcome),
            }
        }
    }

    /// Performs the `initialize` request and `notifications/initialized`.
    pub(crate) async fn initialize(
        self: &Arc<Self>,
        client: &ClientInfo,
    ) -> TransportResult<Value> {
        match self.call("initialize", client.initialize_params()).await? {
            Ok(result) => {
                self.notify("notifications/initialized", None)?;
                Ok(result)
            }
            Err(fault) => Err(TransportError::handshake(self.kind, fault.to_string())),
        }
    }

    /// Requests every page of the tool catalog.
    pub(crate) async fn list_tools(
        self: &Arc<Self>,
    ) -> Result<Vec<McpToolDefinition>, ListToolsError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map_or_else(|| json!({}), |next| json!({"cursor": next}));
            let page = self
                .call("tools/list", params)
                .await?
                .map_err(ListToolsError::Downstream)?;
            tools.extend(parse_tool_list(self.kind, &page)?);
            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    /// Starts a `tools/call` whose progress token is its request id.
    pub(crate) fn invoke(self: &Arc<Self>, request: &ToolCallRequest) -> InvocationStream {
        match self.start("tools/call", |id| call_params(request, id)) {
            Ok(call) => call.into_events().boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    /// Queues a notification.
    pub(crate) fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        self.send(Outbound {
            request_id: None,
            message: notification(method, params),
        })
    }

    fn send(&self, message: Outbound) -> TransportResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::closed(self.kind))
    }

    /// Routes one inbound frame.
    pub(crate) fn route(&self, frame: Value) -> TransportResult<()> {
        match classify(self.kind, frame)? {
            Inbound::Response { id, outcome } => {
                let waiting = id.and_then(|request| self.pending().remove(&request));
                match waiting {
                    Some(sender) => {
                        drop(sender.send(Ok(Routed::Response(outcome))));
                    }
                    None => debug!(
                        transport = %self.kind,
                        ?id,
                        "discarding response with no waiting call"
                    ),
                }
            }
            Inbound::Notification { method, params } if method == "notifications/progress" => {
                let token = progress_token(&params);
                let waiting = token.and_then(|request| self.pending().get(&request).cloned());
                if let Some(sender) = waiting {
                    drop(sender.send(Ok(Routed::Progress(ProgressSignal::from_notification(
                        &params,
                    )))));
                }
            }
            Inbound::Notification { method, .. } => {
                debug!(transport = %self.kind, %method, "ignoring server notification");
            }
            Inbound::Request { id, method } => {
                debug!(transport = %self.kind, %method, "answering server request");
                self.send(Outbound {
                    request_id: None,
                    message: reply_to(id, &method),
                })?;
            }
        }
        Ok(())
    }

    /// Fails one waiting call.
    pub(crate) fn fail(&self, id: u64, error: TransportError) {
        if let Some(sender) = self.pending().remove(&id) {
            drop(sender.send(Err(error)));
        }
    }

    /// Marks the router closed and fails every waiting call.
    pub(crate) fn close(&self, error: &TransportError) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<PendingSender> =
            self.pending().drain().map(|(_, sender)| sender).collect();
        for sender in drained {
            drop(sender.send(Err(error.clone())));
        }
    }

    fn abandon(&self, id: u64) {
        if self.pending().remove(&id).is_some() && !self.is_closed() {
            drop(self.send(Outbound {
                request_id: None,
                message: cancellation(id),
            }));
        }
    }
}

/// A registered call; dropping it before the response arrives cancels it.
#[derive(Debug)]
pub(crate) struct PendingCall {
    id: u64,
    router: Arc<RpcRouter>,
    receiver: mpsc::UnboundedReceiver<TransportResult<Routed>>,
    finished: bool,
}

impl PendingCall {
    /// Returns the request id.
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next routed item.
    pub(crate) async fn next_routed(&mut self) -> TransportResult<Routed> {
        let routed = self
            .receiver
            .recv()
            .await
            .unwrap_or_else(|| Err(TransportError::closed(self.router.kind)));
        if matches!(routed, Ok(Routed::Response(_)) | Err(_)) {
            self.finished = true;
        }
        routed
    }

    /// Converts the call into a stream of invocation events.
    pub(crate) fn into_events(mut self) -> impl Stream<Item = TransportResult<InvocationEvent>> {
        async_stream::stream! {
            loop {
                match self.next_routed().await {
                    Ok(Routed::Progress(signal)) => yield Ok(InvocationEvent::Progress(signal)),
                    Ok(Routed::Response(outcome)) => {
                        yield Ok(completion(outcome));
                        break;
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished {
            self.router.abandon(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rstest::rstest;

    #[rstest]
    #[case(json!({"jsonrpc": "2.0", "id": 3, "result": {"content": []}}), true)]
    #[case(json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}), true)]
    #[case(json!({"jsonrpc": "1.0", "id": 3, "result": {}}), false)]
    #[case(json!(["not", "an", "object"]), false)]
    #[case(json!({"jsonrpc": "2.0", "id": 3}), false)]
    fn frame_classification(#[case] frame: Value, #[case] valid: bool) {
        assert_eq!(classify(TransportKind::Stdio, frame).is_ok(), valid);
    }

    #[test]
    fn error_objects_become_downstream_faults() {
        let inbound = classify(
            TransportKind::Stdio,
            json!({"jsonrpc": "2.0", "id": 9, "error": {"code": -32602, "message": "bad args"}}),
        )
        .expect("frame should classify");

        assert_eq!(
            inbound,
            Inbound::Response {
                id: Some(9),
                outcome: Err(DownstreamFault::RpcError {
                    code: -32_602,
                    message: String::from("bad args"),
                    data: None,
                }),
            }
        );
    }

    #[test]
    fn error_flagged_results_are_rejections() {
        let event = completion(Ok(json!({"content": [], "isError": true})));
        assert!(matches!(
            event,
            InvocationEvent::Rejected(DownstreamFault::ToolError { .. })
        ));
    }

    #[test]
    fn ping_is_answered_and_other_requests_are_refused() {
        assert_eq!(reply_to(json!(1), "ping")["result"], json!({}));
        assert_eq!(
            reply_to(json!(2), "sampling/createMessage")["error"]["code"],
            json!(METHOD_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn progress_and_response_reach_the_waiting_call() {
        let (router, mut outbound) = RpcRouter::new(TransportKind::Sse);
        let call = router
            .start("tools/call", |id| json!({"_meta": {"progressToken": id}}))
            .expect("router should accept calls");
        let id = call.id();
        let sent = outbound.recv().await.expect("request should be queued");
        assert_eq!(sent.request_id, Some(id));

        router
            .route(json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progressToken": id, "progress": 1}
            }))
            .expect("progress should route");
        router
            .route(json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}}))
            .expect("response should route");

        let events: Vec<_> = call.into_events().collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events.first(), Some(Ok(InvocationEvent::Progress(_)))));
        assert!(matches!(events.get(1), Some(Ok(InvocationEvent::Completed(_)))));
    }

    #[tokio::test]
    async fn dropping_a_call_sends_cancellation_and_discards_late_result() {
        let (router, mut outbound) = RpcRouter::new(TransportKind::Stdio);
        let call = router
            .start("tools/call", |_| json!({}))
            .expect("router should accept calls");
        let id = call.id();
        drop(outbound.recv().await);

        drop(call);

        let cancelled = outbound.recv().await.expect("cancellation should be queued");
        assert_eq!(cancelled.message["method"], "notifications/cancelled");
        assert_eq!(cancelled.message["params"]["requestId"], id);
        router
            .route(json!({"jsonrpc": "2.0", "id": id, "result": {}}))
            .expect("late response should be discarded quietly");
    }

    #[tokio::test]
    async fn closing_fails_waiting_and_future_calls() {
        let (router, _outbound) = RpcRouter::new(TransportKind::Stdio);
        let mut call = router
            .start("tools/call", |_| json!({}))
            .expect("router should accept calls");

        router.close(&TransportError::closed(TransportKind::Stdio));

        assert!(call.next_routed().await.is_err());
        assert!(router.start("tools/call", |_| json!({})).is_err());
    }
}
