//! Repository port for server descriptor persistence.

use crate::tool_registry::domain::{McpServerName, ServerDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for server descriptor repository operations.
pub type ServerDescriptorRepositoryResult<T> = Result<T, ServerDescriptorRepositoryError>;

/// Persistence contract for server descriptors.
///
/// The store keeps its own index; repositories only need to load everything
/// at start-up and apply single-descriptor writes.
#[async_trait]
pub trait ServerDescriptorRepository: Send + Sync {
    /// Loads every persisted descriptor.
    async fn load_all(&self) -> ServerDescriptorRepositoryResult<Vec<ServerDescriptor>>;

    /// Inserts or replaces the descriptor with the same name.
    async fn save(&self, descriptor: &ServerDescriptor) -> ServerDescriptorRepositoryResult<()>;

    /// Removes a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDescriptorRepositoryError::NotFound`] when no
    /// descriptor has the given name.
    async fn delete(&self, name: &McpServerName) -> ServerDescriptorRepositoryResult<()>;
}

/// Errors returned by server descriptor repository implementations.
#[derive(Debug, Clone, Error)]
pub enum ServerDescriptorRepositoryError {
    /// The descriptor was not found.
    #[error("MCP server not found: {0}")]
    NotFound(McpServerName),

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted MCP server data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ServerDescriptorRepositoryError {
    /// Wraps persisted-data decoding or validation failures.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
