//! Errors surfaced by dispatch and registry operations.

use super::{AcquireError, DescriptorStoreError, GateError, GovernorError};
use crate::tool_registry::{
    domain::{
        DownstreamFault, McpServerName, TimeoutClock, ToolRegistryDomainError, TransportKind,
    },
    ports::{ServerDescriptorRepositoryError, TransportError},
};
use thiserror::Error;

/// Failure of a dispatch or registry operation.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The server does not exist or is disabled.
    #[error("MCP server '{0}' not found")]
    NotFound(McpServerName),
    /// A server with this name already exists.
    #[error("MCP server '{0}' already exists")]
    AlreadyExists(McpServerName),
    /// Input violates a domain invariant.
    #[error(transparent)]
    Validation(#[from] ToolRegistryDomainError),
    /// The tool is disabled on this server.
    #[error("tool '{tool}' is disabled on MCP server '{server}'")]
    ToolDisabled {
        /// Server name.
        server: McpServerName,
        /// Tool name.
        tool: String,
    },
    /// The server's exclusive connection is serving another call.
    #[error("MCP server '{0}' is busy with another call")]
    Busy(McpServerName),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A deadline fired before the call finished.
    #[error("tool call timed out ({clock} deadline)")]
    TimedOut {
        /// The deadline that fired.
        clock: TimeoutClock,
    },
    /// The server answered with an error.
    #[error("downstream error: {0}")]
    Downstream(DownstreamFault),
    /// Descriptor persistence failed.
    #[error(transparent)]
    Repository(#[from] ServerDescriptorRepositoryError),
}

/// Result type for dispatch and registry operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<DescriptorStoreError> for DispatchError {
    fn from(err: DescriptorStoreError) -> Self {
        match err {
            DescriptorStoreError::NotFound(name) => Self::NotFound(name),
            DescriptorStoreError::AlreadyExists(name) => Self::AlreadyExists(name),
            DescriptorStoreError::Validation(inner) => Self::Validation(inner),
            DescriptorStoreError::Repository(inner) => Self::Repository(inner),
        }
    }
}

impl From<AcquireError> for DispatchError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Withdrawn(name) => Self::NotFound(name),
            AcquireError::Transport(inner) => Self::Transport(inner),
        }
    }
}

impl From<GovernorError> for DispatchError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::TimedOut { clock } => Self::TimedOut { clock },
            GovernorError::Transport(inner) => Self::Transport(inner),
            GovernorError::Downstream(fault) => Self::Downstream(fault),
        }
    }
}

impl DispatchError {
    pub(crate) fn from_gate(server: &McpServerName, kind: TransportKind, err: GateError) -> Self {
        match err {
            GateError::Busy => Self::Busy(server.clone()),
            GateError::Closed => Self::Transport(TransportError::closed(kind)),
        }
    }
}
