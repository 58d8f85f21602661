//! Domain model for MCP server configuration and tool dispatch.
//!
//! The tool registry domain models MCP server identity, transport
//! configuration, timeout options, connection lifecycle states and the
//! values exchanged during a tool invocation. Infrastructure concerns remain
//! outside this boundary.

mod connection;
mod descriptor;
mod document;
mod error;
mod ids;
mod invocation;
mod options;
mod tool;
mod transport;

pub use connection::{ConnectionSnapshot, ConnectionState};
pub use descriptor::{PersistedServerDescriptor, ServerDescriptor};
pub use document::{RequestOptionsBody, ServerConfigBody, ServerConfigDocument, ToolOverrideBody};
pub use error::{ParseConnectionStateError, ParseTransportKindError, ToolRegistryDomainError};
pub use ids::{ConnectionId, McpServerName};
pub use invocation::{
    DownstreamFault, InvocationEvent, ProgressSignal, TimeoutClock, ToolCallRequest,
    ToolCallResult,
};
pub use options::{DEFAULT_CALL_TIMEOUT_MS, InvocationOptions};
pub use tool::{McpToolDefinition, ToolCatalogEntry, ToolOverride};
pub use transport::{HttpEndpointConfig, McpTransport, StdioTransportConfig, TransportKind};
