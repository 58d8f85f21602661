//! Validated, persisted index of server descriptors.

use crate::tool_registry::{
    domain::{McpServerName, ServerDescriptor, ToolRegistryDomainError},
    ports::{ServerDescriptorRepository, ServerDescriptorRepositoryError},
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Errors raised by [`DescriptorStore`].
#[derive(Debug, Clone, Error)]
pub enum DescriptorStoreError {
    /// No descriptor exists with this name.
    #[error("MCP server '{0}' not found")]
    NotFound(McpServerName),
    /// A descriptor with this name already exists.
    #[error("MCP server '{0}' already exists")]
    AlreadyExists(McpServerName),
    /// The descriptor violates a domain invariant.
    #[error(transparent)]
    Validation(#[from] ToolRegistryDomainError),
    /// The repository rejected the operation.
    #[error(transparent)]
    Repository(ServerDescriptorRepositoryError),
}

impl From<ServerDescriptorRepositoryError> for DescriptorStoreError {
    fn from(err: ServerDescriptorRepositoryError) -> Self {
        match err {
            ServerDescriptorRepositoryError::NotFound(name) => Self::NotFound(name),
            other => Self::Repository(other),
        }
    }
}

/// Result type for store operations.
pub type DescriptorStoreResult<T> = Result<T, DescriptorStoreError>;

type Index = BTreeMap<McpServerName, Arc<ServerDescriptor>>;

/// In-memory index of descriptors backed by a repository.
///
/// Writes reach the repository first; the index changes only once the
/// repository has accepted them. Reads hand out shared snapshots.
pub struct DescriptorStore<R>
where
    R: ServerDescriptorRepository,
{
    repository: Arc<R>,
    index: RwLock<Index>,
    write_lock: Mutex<()>,
}

impl<R> DescriptorStore<R>
where
    R: ServerDescriptorRepository,
{
    /// Creates an empty store; call [`Self::load`] to fill it.
    #[must_use]
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            index: RwLock::new(Index::new()),
            write_lock: Mutex::new(()),
        }
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the index with every descriptor in the repository.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::Repository`] when loading fails, in
    /// which case the index is left untouched.
    pub async fn load(&self) -> DescriptorStoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let descriptors = self.repository.load_all().await?;
        let loaded: Index = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name().clone(), Arc::new(descriptor)))
            .collect();
        let count = loaded.len();
        *self.write_index() = loaded;
        info!(servers = count, "loaded MCP server descriptors");
        Ok(count)
    }

    /// Returns the descriptor named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::NotFound`] when it does not exist.
    pub fn get(&self, name: &McpServerName) -> DescriptorStoreResult<Arc<ServerDescriptor>> {
        self.read_index()
            .get(name)
            .cloned()
            .ok_or_else(|| DescriptorStoreError::NotFound(name.clone()))
    }

    /// Returns every descriptor, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ServerDescriptor>> {
        self.read_index().values().cloned().collect()
    }

    /// Validates and stores `descriptor`, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::Validation`] before touching the
    /// repository, or [`DescriptorStoreError::Repository`] when the write
    /// fails.
    pub async fn upsert(
        &self,
        descriptor: ServerDescriptor,
    ) -> DescriptorStoreResult<Arc<ServerDescriptor>> {
        descriptor.validate()?;
        let _guard = self.write_lock.lock().await;
        self.commit(descriptor).await
    }

    /// Stores `descriptor` only when no descriptor has its name yet.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::AlreadyExists`] for a duplicate name,
    /// plus the errors of [`Self::upsert`].
    pub async fn insert(
        &self,
        descriptor: ServerDescriptor,
    ) -> DescriptorStoreResult<Arc<ServerDescriptor>> {
        descriptor.validate()?;
        let _guard = self.write_lock.lock().await;
        if self.read_index().contains_key(descriptor.name()) {
            return Err(DescriptorStoreError::AlreadyExists(
                descriptor.name().clone(),
            ));
        }
        self.commit(descriptor).await
    }

    /// Applies `change` to a copy of the named descriptor and stores it.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::NotFound`], any domain error raised by
    /// `change` or by validation, and repository failures.
    pub async fn modify<F>(
        &self,
        name: &McpServerName,
        change: F,
    ) -> DescriptorStoreResult<Arc<ServerDescriptor>>
    where
        F: FnOnce(&mut ServerDescriptor) -> Result<(), ToolRegistryDomainError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let existing = self.get(name)?;
        let mut descriptor = ServerDescriptor::clone(&existing);
        change(&mut descriptor)?;
        descriptor.validate()?;
        self.commit(descriptor).await
    }

    /// Deletes the named descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorStoreError::NotFound`] when it does not exist and
    /// repository failures otherwise.
    pub async fn remove(
        &self,
        name: &McpServerName,
    ) -> DescriptorStoreResult<Arc<ServerDescriptor>> {
        let _guard = self.write_lock.lock().await;
        let existing = self.get(name)?;
        self.repository.delete(name).await?;
        self.write_index().remove(name);
        info!(server = %name, "removed MCP server descriptor");
        Ok(existing)
    }

    async fn commit(
        &self,
        descriptor: ServerDescriptor,
    ) -> DescriptorStoreResult<Arc<ServerDescriptor>> {
        self.repository.save(&descriptor).await?;
        let stored = Arc::new(descriptor);
        self.write_index()
            .insert(stored.name().clone(), Arc::clone(&stored));
        info!(
            server = %stored.name(),
            transport = %stored.transport_kind(),
            enabled = stored.enabled(),
            "stored MCP server descriptor"
        );
        Ok(stored)
    }
}
