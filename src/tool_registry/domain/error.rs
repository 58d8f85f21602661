//! Error types for MCP server domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing tool registry domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolRegistryDomainError {
    /// The server name is empty after trimming.
    #[error("MCP server name must not be empty")]
    EmptyServerName,

    /// The server name contains characters outside `[A-Za-z0-9_.-]`.
    #[error(
        "MCP server name '{0}' contains invalid characters (only ASCII alphanumerics, '_', '-' and '.' allowed)"
    )]
    InvalidServerName(String),

    /// The server name exceeds the 100-character storage limit.
    #[error("MCP server name exceeds 100 character limit: {0}")]
    ServerNameTooLong(String),

    /// The STDIO command is empty.
    #[error("STDIO command must not be empty")]
    EmptyStdioCommand,

    /// The STDIO working directory is empty after trimming.
    #[error("STDIO working directory must not be empty when provided")]
    EmptyWorkingDirectory,

    /// An environment variable name is empty or contains `=`.
    #[error("environment variable name '{0}' is invalid")]
    InvalidEnvironmentKey(String),

    /// The endpoint URL is empty.
    #[error("endpoint URL must not be empty")]
    EmptyEndpointUrl,

    /// The endpoint URL does not parse or is not `http`/`https`.
    #[error("endpoint URL '{url}' is invalid: {reason}")]
    InvalidEndpointUrl {
        /// Offending URL text.
        url: String,
        /// Parser or scheme diagnostic.
        reason: String,
    },

    /// A header name is not a valid HTTP header name.
    #[error("header name '{0}' is invalid")]
    InvalidHeaderName(String),

    /// A header value contains control characters.
    #[error("value of header '{0}' contains control characters")]
    InvalidHeaderValue(String),

    /// Two header names collide under case-insensitive comparison.
    #[error("header '{0}' is configured more than once")]
    DuplicateHeader(String),

    /// The transport type string is not recognised.
    #[error("unknown transport type '{0}' (expected stdio, sse or streamable-http)")]
    UnknownTransportType(String),

    /// Both process and endpoint fields were supplied.
    #[error("server configuration mixes process fields ({process_fields}) with endpoint fields ({endpoint_fields})")]
    ConflictingTransportFields {
        /// Populated process-variant fields.
        process_fields: String,
        /// Populated endpoint-variant fields.
        endpoint_fields: String,
    },

    /// A timeout value is zero.
    #[error("{field} must be a positive number of milliseconds")]
    NonPositiveTimeout {
        /// Name of the option carrying the value.
        field: &'static str,
    },

    /// The absolute ceiling is shorter than the per-call timeout.
    #[error(
        "maxTotalTimeout ({max_total_timeout_ms} ms) must not be shorter than timeout ({call_timeout_ms} ms)"
    )]
    TotalTimeoutBelowCallTimeout {
        /// Per-call timeout in milliseconds.
        call_timeout_ms: u64,
        /// Absolute ceiling in milliseconds.
        max_total_timeout_ms: u64,
    },

    /// A tool name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// An update names a different server than the one it targets.
    #[error("MCP server '{current}' cannot be renamed to '{requested}'")]
    RenameNotSupported {
        /// Name of the server being updated.
        current: String,
        /// Name carried by the update document.
        requested: String,
    },

    /// Transitioning between two connection states is invalid.
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current connection state.
        from: String,
        /// Requested target connection state.
        to: String,
    },
}

/// Error returned while parsing a transport kind from its wire name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown MCP transport kind: {0}")]
pub struct ParseTransportKindError(pub String);

/// Error returned while parsing connection state from its canonical name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown MCP connection state: {0}")]
pub struct ParseConnectionStateError(pub String);
