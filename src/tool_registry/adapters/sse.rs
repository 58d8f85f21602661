//! Legacy MCP HTTP+SSE transport.
//!
//! The client holds one `GET` event stream open. The server's first
//! `endpoint` event names the URL that receives every client message as a
//! `POST`; responses and notifications come back as `message` events.

use super::http::{ensure_success, header_map};
use super::jsonrpc::{ClientInfo, Outbound, RpcRouter};
use super::sse_codec::{SseEvent, decode_stream};
use crate::tool_registry::{
    domain::{
        ConnectionId, McpServerName, McpToolDefinition, McpTransport, ServerDescriptor,
        ToolCallRequest, TransportKind,
    },
    ports::{
        CallConcurrency, InvocationStream, ListToolsError, TransportAdapter, TransportConnection,
        TransportError, TransportResult,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Url};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

const KIND: TransportKind = TransportKind::Sse;

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, reqwest::Error>> + Send>>;

/// Connects to MCP servers over the legacy HTTP+SSE transport.
#[derive(Debug, Clone)]
pub struct SseTransportAdapter {
    client: ClientInfo,
    http: Client,
}

impl SseTransportAdapter {
    /// Creates an adapter with its own HTTP client.
    #[must_use]
    pub fn new(client: ClientInfo) -> Self {
        Self::with_http_client(client, Client::new())
    }

    /// Creates an adapter sharing an existing HTTP client.
    #[must_use]
    pub const fn with_http_client(client: ClientInfo, http: Client) -> Self {
        Self { client, http }
    }
}

#[async_trait]
impl TransportAdapter for SseTransportAdapter {
    fn kind(&self) -> TransportKind {
        KIND
    }

    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        let McpTransport::Sse(endpoint) = descriptor.transport() else {
            return Err(TransportError::protocol(
                KIND,
                format!("server '{}' is not an SSE server", descriptor.name()),
            ));
        };
        let base_url = Url::parse(endpoint.url())
            .map_err(|err| TransportError::protocol(KIND, err.to_string()))?;
        let headers = header_map(KIND, endpoint.headers())?;

        let sent = self
            .http
            .get(base_url.clone())
            .headers(headers.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await
            .map_err(|err| TransportError::http(KIND, err))?;
        let response = ensure_success(KIND, sent).await?;
        let mut events: EventStream = Box::pin(decode_stream(Box::pin(response.bytes_stream())));

        let post_url = await_endpoint(&mut events, &base_url).await?;
        let connection_id = ConnectionId::new();
        info!(
            server = %descriptor.name(),
            connection_id = %connection_id,
            endpoint = %post_url,
            "SSE session established"
        );

        let (router, outbound) = RpcRouter::new(KIND);
        let reader_task = tokio::spawn(read_events(events, Arc::clone(&router)));
        let writer_task = tokio::spawn(post_messages(
            self.http.clone(),
            post_url,
            headers,
            outbound,
            Arc::clone(&router),
        ));
        let connection = SseConnection {
            id: connection_id,
            server: descriptor.name().clone(),
            router,
            reader_task,
            writer_task,
        };

        if let Err(err) = connection.router.initialize(&self.client).await {
            warn!(
                server = %descriptor.name(),
                connection_id = %connection_id,
                error = %err,
                "initialize handshake failed"
            );
            connection.close().await;
            return Err(err);
        }
        Ok(Arc::new(connection))
    }
}

async fn await_endpoint(events: &mut EventStream, base_url: &Url) -> TransportResult<Url> {
    while let Some(item) = events.next().await {
        let event = item.map_err(|err| TransportError::http(KIND, err))?;
        if event.event != "endpoint" {
            debug!(event = %event.event, "ignoring SSE event before endpoint");
            continue;
        }
        let resolved = base_url.join(event.data.trim()).map_err(|err| {
            TransportError::handshake(KIND, format!("invalid endpoint '{}': {err}", event.data))
        })?;
        if resolved.origin() != base_url.origin() {
            return Err(TransportError::handshake(
                KIND,
                format!("endpoint origin does not match connection origin: {resolved}"),
            ));
        }
        return Ok(resolved);
    }
    Err(TransportError::handshake(
        KIND,
        "event stream ended before the endpoint event",
    ))
}

async fn read_events(mut events: EventStream, router: Arc<RpcRouter>) {
    let failure = loop {
        match events.next().await {
            Some(Ok(event)) if event.event == "message" => {
                let routed = serde_json::from_str::<serde_json::Value>(&event.data)
                    .map_err(|err| {
                        TransportError::protocol(KIND, format!("invalid JSON message: {err}"))
                    })
                    .and_then(|frame| router.route(frame));
                if let Err(err) = routed {
                    break err;
                }
            }
            Some(Ok(event)) => debug!(event = %event.event, "ignoring SSE event"),
            Some(Err(err)) => break TransportError::http(KIND, err),
            None => break TransportError::closed(KIND),
        }
    };
    debug!(error = %failure, "SSE stream ended");
    router.close(&failure);
}

async fn post_messages(
    http: Client,
    url: Url,
    headers: HeaderMap,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    router: Arc<RpcRouter>,
) {
    // Each post runs on its own task so a slow endpoint only delays its own call.
    let mut deliveries = JoinSet::new();
    loop {
        tokio::select! {
            received = outbound.recv() => {
                let Some(item) = received else { break };
                let request = http.post(url.clone()).headers(headers.clone());
                deliveries.spawn(deliver(request, item, Arc::clone(&router)));
            }
            Some(finished) = deliveries.join_next(), if !deliveries.is_empty() => {
                if let Err(err) = finished {
                    debug!(error = %err, "SSE delivery task ended abnormally");
                }
            }
        }
    }
    while deliveries.join_next().await.is_some() {}
}

async fn deliver(request: RequestBuilder, item: Outbound, router: Arc<RpcRouter>) {
    let sent = match request.json(&item.message).send().await {
        Ok(response) => ensure_success(KIND, response).await.map(drop),
        Err(err) => Err(TransportError::http(KIND, err)),
    };
    if let Err(err) = sent {
        match item.request_id {
            Some(id) => router.fail(id, err),
            None => warn!(error = %err, "failed to deliver SSE notification"),
        }
    }
}

struct SseConnection {
    id: ConnectionId,
    server: McpServerName,
    router: Arc<RpcRouter>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Drop for SseConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

#[async_trait]
impl TransportConnection for SseConnection {
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
        self.router.list_tools().await
    }

    fn invoke(&self, request: ToolCallRequest) -> InvocationStream {
        self.router.invoke(&request)
    }

    async fn close(&self) {
        self.router.close(&TransportError::closed(KIND));
        self.reader_task.abort();
        self.writer_task.abort();
        debug!(server = %self.server, connection_id = %self.id, "SSE session closed");
    }
}
