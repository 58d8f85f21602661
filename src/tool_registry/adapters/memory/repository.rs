//! In-memory repository for server descriptors.

use crate::tool_registry::{
    domain::{McpServerName, ServerDescriptor},
    ports::{
        ServerDescriptorRepository, ServerDescriptorRepositoryError,
        ServerDescriptorRepositoryResult,
    },
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Thread-safe in-memory server descriptor repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServerDescriptorRepository {
    state: Arc<RwLock<BTreeMap<McpServerName, ServerDescriptor>>>,
}

impl InMemoryServerDescriptorRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository pre-populated with descriptors.
    #[must_use]
    pub fn with_descriptors(descriptors: impl IntoIterator<Item = ServerDescriptor>) -> Self {
        let servers = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name().clone(), descriptor))
            .collect();
        Self {
            state: Arc::new(RwLock::new(servers)),
        }
    }
}

#[async_trait]
impl ServerDescriptorRepository for InMemoryServerDescriptorRepository {
    async fn load_all(&self) -> ServerDescriptorRepositoryResult<Vec<ServerDescriptor>> {
        let state = self.state.read().map_err(|err| {
            ServerDescriptorRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        Ok(state.values().cloned().collect())
    }

    async fn save(&self, descriptor: &ServerDescriptor) -> ServerDescriptorRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            ServerDescriptorRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        state.insert(descriptor.name().clone(), descriptor.clone());
        Ok(())
    }

    async fn delete(&self, name: &McpServerName) -> ServerDescriptorRepositoryResult<()> {
        let mut state = self.state.write().map_err(|err| {
            ServerDescriptorRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })?;
        state
            .remove(name)
            .map(drop)
            .ok_or_else(|| ServerDescriptorRepositoryError::NotFound(name.clone()))
    }
}
