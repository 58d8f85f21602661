//! Streamable HTTP transport.
//!
//! Every client message is its own `POST`. The server answers a request
//! either with a single JSON body or with an event stream carrying progress
//! notifications followed by the response.

use super::http::{ensure_success, header_map, is_event_stream};
use super::jsonrpc::{
    self, ClientInfo, Inbound, Routed, call_params, classify, completion, parse_tool_list,
    progress_token,
};
use super::sse_codec::decode_stream;
use crate::tool_registry::{
    domain::{
        ConnectionId, DownstreamFault, InvocationEvent, McpServerName, McpToolDefinition,
        McpTransport, ProgressSignal, ServerDescriptor, ToolCallRequest, TransportKind,
    },
    ports::{
        CallConcurrency, InvocationStream, ListToolsError, TransportAdapter, TransportConnection,
        TransportError, TransportResult,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const KIND: TransportKind = TransportKind::StreamableHttp;
const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Connects to MCP servers over streamable HTTP.
#[derive(Debug, Clone)]
pub struct StreamableHttpTransportAdapter {
    client: ClientInfo,
    http: Client,
    close_timeout: Duration,
}

impl StreamableHttpTransportAdapter {
    /// Creates an adapter with its own HTTP client.
    ///
    /// Session termination on close gives up after `close_timeout`.
    #[must_use]
    pub fn new(client: ClientInfo, close_timeout: Duration) -> Self {
        Self::with_http_client(client, Client::new(), close_timeout)
    }

    /// Creates an adapter sharing an existing HTTP client.
    #[must_use]
    pub const fn with_http_client(
        client: ClientInfo,
        http: Client,
        close_timeout: Duration,
    ) -> Self {
        Self {
            client,
            http,
            close_timeout,
        }
    }
}

#[async_trait]
impl TransportAdapter for StreamableHttpTransportAdapter {
    fn kind(&self) -> TransportKind {
        KIND
    }

    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        let McpTransport::StreamableHttp(endpoint) = descriptor.transport() else {
            return Err(TransportError::protocol(
                KIND,
                format!("server '{}' is not a streamable HTTP server", descriptor.name()),
            ));
        };
        let url = Url::parse(endpoint.url())
            .map_err(|err| TransportError::protocol(KIND, err.to_string()))?;
        let session = Arc::new(HttpSession {
            http: self.http.clone(),
            url,
            headers: header_map(KIND, endpoint.headers())?,
            session_id: OnceLock::new(),
            next_id: AtomicU64::new(1),
        });

        if let Err(fault) = session
            .call("initialize", self.client.initialize_params())
            .await?
        {
            return Err(TransportError::handshake(KIND, fault.to_string()));
        }
        session.notify("notifications/initialized").await?;

        let connection_id = ConnectionId::new();
        info!(
            server = %descriptor.name(),
            connection_id = %connection_id,
            session = ?session.session_id.get(),
            "streamable HTTP session established"
        );
        Ok(Arc::new(StreamableHttpConnection {
            id: connection_id,
            server: descriptor.name().clone(),
            session,
            close_timeout: self.close_timeout,
        }))
    }
}

struct HttpSession {
    http: Client,
    url: Url,
    headers: HeaderMap,
    session_id: OnceLock<HeaderValue>,
    next_id: AtomicU64,
}

impl HttpSession {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(&self, message: &Value) -> TransportResult<Response> {
        let mut builder = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH))
            .json(message);
        if let Some(session_id) = self.session_id.get() {
            builder = builder.header(SESSION_HEADER, session_id.clone());
        }
        let sent = builder
            .send()
            .await
            .map_err(|err| TransportError::http(KIND, err))?;
        let response = ensure_success(KIND, sent).await?;
        if let Some(session_id) = response.headers().get(SESSION_HEADER) {
            drop(self.session_id.set(session_id.clone()));
        }
        Ok(response)
    }

    async fn notify(&self, method: &str) -> TransportResult<()> {
        self.post(&jsonrpc::notification(method, None)).await.map(drop)
    }

    async fn call(
        self: &Arc<Self>,
        method: &str,
        params: Value,
    ) -> TransportResult<Result<Value, DownstreamFault>> {
        let id = self.next_id();
        let response = self.post(&jsonrpc::request(id, method, params)).await?;
        let mut routed = self.exchange(id, response);
        while let Some(item) = routed.next().await {
            if let Routed::Response(outcome) = item? {
                return Ok(outcome);
            }
        }
        Err(TransportError::closed(KIND))
    }

    /// Reads the answer to request `id` from a JSON or event-stream body.
    fn exchange(
        self: &Arc<Self>,
        id: u64,
        response: Response,
    ) -> BoxStream<'static, TransportResult<Routed>> {
        if !is_event_stream(&response) {
            return futures::stream::once(read_json_answer(id, response)).boxed();
        }

        let session = Arc::clone(self);
        let mut events = Box::pin(decode_stream(Box::pin(response.bytes_stream())));
        async_stream::stream! {
            loop {
                let Some(item) = events.next().await else {
                    yield Err(TransportError::closed(KIND));
                    break;
                };
                let event = match item {
                    Ok(event) if event.event == "message" => event,
                    Ok(_) => continue,
                    Err(err) => {
                        yield Err(TransportError::http(KIND, err));
                        break;
                    }
                };
                let inbound = serde_json::from_str::<Value>(&event.data)
                    .map_err(|err| {
                        TransportError::protocol(KIND, format!("invalid JSON message: {err}"))
                    })
                    .and_then(|frame| classify(KIND, frame));
                match inbound {
                    Ok(Inbound::Response { id: Some(answered), outcome }) if answered == id => {
                        yield Ok(Routed::Response(outcome));
                        break;
                    }
                    Ok(Inbound::Response { id: other, .. }) => {
                        debug!(?other, "ignoring response for another request");
                    }
                    Ok(Inbound::Notification { method, params }) => {
                        let is_progress = method == "notifications/progress"
                            && progress_token(&params) == Some(id);
                        if is_progress {
                            let signal = ProgressSignal::from_notification(&params);
                            yield Ok(Routed::Progress(signal));
                        } else {
                            debug!(%method, "ignoring server notification");
                        }
                    }
                    Ok(Inbound::Request { id: request_id, method }) => {
                        session.reply(request_id, &method);
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
        .boxed()
    }

    fn reply(self: &Arc<Self>, request_id: Value, method: &str) {
        let session = Arc::clone(self);
        let reply = jsonrpc::reply_to(request_id, method);
        tokio::spawn(async move {
            if let Err(err) = session.post(&reply).await {
                warn!(error = %err, "failed to answer server request");
            }
        });
    }

    async fn terminate(&self) -> TransportResult<()> {
        let Some(session_id) = self.session_id.get() else {
            return Ok(());
        };
        self.http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session_id.clone())
            .send()
            .await
            .map(drop)
            .map_err(|err| TransportError::http(KIND, err))
    }
}

async fn read_json_answer(id: u64, response: Response) -> TransportResult<Routed> {
    let body: Value = response
        .json()
        .await
        .map_err(|err| TransportError::protocol(KIND, format!("invalid JSON body: {err}")))?;
    match classify(KIND, body)? {
        Inbound::Response {
            id: Some(answered),
            outcome,
        } if answered == id => Ok(Routed::Response(outcome)),
        _ => Err(TransportError::protocol(
            KIND,
            format!("body is not the response to request {id}"),
        )),
    }
}

struct StreamableHttpConnection {
    id: ConnectionId,
    server: McpServerName,
    session: Arc<HttpSession>,
    close_timeout: Duration,
}

#[async_trait]
impl TransportConnection for StreamableHttpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        KIND
    }

    fn concurrency(&self) -> CallConcurrency {
        CallConcurrency::Multiplexed
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, ListToolsError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map_or_else(|| json!({}), |next| json!({"cursor": next}));
            let page = self
                .session
                .call("tools/list", params)
                .await?
                .map_err(ListToolsError::Downstream)?;
            tools.extend(parse_tool_list(KIND, &page)?);
            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    fn invoke(&self, request: ToolCallRequest) -> InvocationStream {
        let session = Arc::clone(&self.session);
        async_stream::stream! {
            let id = session.next_id();
            let message = jsonrpc::request(id, "tools/call", call_params(&request, id));
            match session.post(&message).await {
                Err(err) => yield Err(err),
                Ok(response) => {
                    let mut routed = session.exchange(id, response);
                    while let Some(item) = routed.next().await {
                        match item {
                            Ok(Routed::Progress(signal)) => {
                                yield Ok(InvocationEvent::Progress(signal));
                            }
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
        .boxed()
    }

    async fn close(&self) {
        match tokio::time::timeout(self.close_timeout, self.session.terminate()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(
                server = %self.server,
                connection_id = %self.id,
                error = %err,
                "session termination failed"
            ),
            Err(_) => warn!(
                server = %self.server,
                connection_id = %self.id,
                timeout_ms = u64::try_from(self.close_timeout.as_millis()).unwrap_or(u64::MAX),
                "session termination timed out"
            ),
        }
    }
}
