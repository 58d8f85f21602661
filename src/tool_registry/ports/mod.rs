//! Port contracts for descriptor persistence and MCP transports.

mod repository;
mod transport;

pub use repository::{
    ServerDescriptorRepository, ServerDescriptorRepositoryError, ServerDescriptorRepositoryResult,
};
pub use transport::{
    CallConcurrency, InvocationStream, ListToolsError, TransportAdapter, TransportConnection,
    TransportError, TransportFailure, TransportResult,
};
