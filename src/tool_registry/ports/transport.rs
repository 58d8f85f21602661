//! Transport port: opening connections to MCP servers and invoking tools.

use crate::tool_registry::domain::{
    ConnectionId, DownstreamFault, InvocationEvent, McpToolDefinition, ServerDescriptor,
    ToolCallRequest, TransportKind,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Events of one in-flight call.
///
/// Dropping the stream before it yields a terminal event cancels the call:
/// the routing entry is removed and any later result is discarded.
pub type InvocationStream = BoxStream<'static, TransportResult<InvocationEvent>>;

/// How many calls a connection may carry at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConcurrency {
    /// One in-flight call at a time.
    Exclusive,
    /// Calls are correlated by request id and may overlap.
    Multiplexed,
}

/// Factory for live connections of one transport kind.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Returns the transport kind this adapter serves.
    fn kind(&self) -> TransportKind;

    /// Opens a connection and completes the MCP initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the process cannot be spawned, the
    /// endpoint is unreachable, or the handshake fails.
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> TransportResult<Arc<dyn TransportConnection>>;
}

/// A live, initialized connection to one MCP server.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Returns the identifier used to correlate log lines and failures.
    fn id(&self) -> ConnectionId;

    /// Returns the transport kind.
    fn kind(&self) -> TransportKind;

    /// Returns the concurrency capability of this connection.
    fn concurrency(&self) -> CallConcurrency;

    /// Requests the server's tool catalog.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, ListToolsError>;

    /// Starts a `tools/call` and returns its event stream.
    fn invoke(&self, request: ToolCallRequest) -> InvocationStream;

    /// Releases the connection's resources.
    async fn close(&self);
}

/// Failure of a `tools/list` request.
#[derive(Debug, Clone, Error)]
pub enum ListToolsError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an error.
    #[error("{0}")]
    Downstream(DownstreamFault),
}

/// A transport-level failure tagged with the transport that produced it.
#[derive(Debug, Clone, Error)]
#[error("{kind} transport error: {failure}")]
pub struct TransportError {
    kind: TransportKind,
    failure: TransportFailure,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub const fn new(kind: TransportKind, failure: TransportFailure) -> Self {
        Self { kind, failure }
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns the failure category and detail.
    #[must_use]
    pub const fn failure(&self) -> &TransportFailure {
        &self.failure
    }

    /// Creates a [`TransportFailure::Closed`] error.
    #[must_use]
    pub const fn closed(kind: TransportKind) -> Self {
        Self::new(kind, TransportFailure::Closed)
    }

    /// Creates a [`TransportFailure::Protocol`] error.
    #[must_use]
    pub fn protocol(kind: TransportKind, detail: impl Into<String>) -> Self {
        Self::new(kind, TransportFailure::Protocol(detail.into()))
    }

    /// Creates a [`TransportFailure::Handshake`] error.
    #[must_use]
    pub fn handshake(kind: TransportKind, detail: impl Into<String>) -> Self {
        Self::new(kind, TransportFailure::Handshake(detail.into()))
    }

    /// Wraps an I/O failure.
    pub fn io(kind: TransportKind, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(kind, TransportFailure::Io(Arc::new(err)))
    }

    /// Wraps an HTTP client failure.
    pub fn http(kind: TransportKind, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(kind, TransportFailure::Http(Arc::new(err)))
    }
}

/// Category of a transport failure.
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    /// The server process could not be started.
    #[error("failed to spawn '{command}': {cause}")]
    Spawn {
        /// Command that failed to start.
        command: String,
        /// Underlying operating system error.
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Reading from or writing to the process pipes failed.
    #[error("I/O failure: {0}")]
    Io(Arc<dyn std::error::Error + Send + Sync>),

    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(Arc<dyn std::error::Error + Send + Sync>),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The peer sent something that is not valid MCP JSON-RPC.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The initialize handshake was refused or malformed.
    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    /// The connection ended before the call completed.
    #[error("connection closed")]
    Closed,

    /// Opening the connection took longer than allowed.
    #[error("connection was not established within {timeout_ms} ms")]
    ConnectTimeout {
        /// Configured connect timeout in milliseconds.
        timeout_ms: u64,
    },
}
