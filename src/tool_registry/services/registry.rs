//! Configuration operations on registered servers.

use super::{ConnectionPool, DescriptorStore, DispatchError, DispatchResult, Dispatcher};
use crate::tool_registry::{
    domain::{
        ConnectionSnapshot, McpServerName, ServerConfigDocument, ServerDescriptor,
        ToolRegistryDomainError,
    },
    ports::ServerDescriptorRepository,
};
use mockable::Clock;
use std::sync::Arc;
use tracing::info;

/// A descriptor together with its live connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Stored configuration.
    pub descriptor: Arc<ServerDescriptor>,
    /// Current connection state.
    pub connection: ConnectionSnapshot,
}

impl ServerStatus {
    /// Renders the configuration as a document.
    #[must_use]
    pub fn document(&self) -> ServerConfigDocument {
        ServerConfigDocument::from_descriptor(&self.descriptor)
    }
}

/// Create, update, delete and toggle operations over the store and pool.
///
/// Changes that alter how a server is reached evict its live connection so
/// the next call opens one with the new configuration.
pub struct ToolRegistryService<R, C>
where
    R: ServerDescriptorRepository,
    C: Clock + Send + Sync,
{
    store: Arc<DescriptorStore<R>>,
    pool: Arc<ConnectionPool<C>>,
    clock: Arc<C>,
}

impl<R, C> ToolRegistryService<R, C>
where
    R: ServerDescriptorRepository,
    C: Clock + Send + Sync,
{
    /// Creates a service.
    #[must_use]
    pub const fn new(
        store: Arc<DescriptorStore<R>>,
        pool: Arc<ConnectionPool<C>>,
        clock: Arc<C>,
    ) -> Self {
        Self { store, pool, clock }
    }

    /// Returns a dispatcher sharing this service's store and pool.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher<R, C> {
        Dispatcher::new(Arc::clone(&self.store), Arc::clone(&self.pool))
    }

    /// Registers a new server.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] for an invalid document,
    /// [`DispatchError::AlreadyExists`] for a duplicate name, and repository
    /// failures.
    pub async fn create_server(
        &self,
        document: ServerConfigDocument,
    ) -> DispatchResult<Arc<ServerDescriptor>> {
        let descriptor = document.into_descriptor(&*self.clock)?;
        Ok(self.store.insert(descriptor).await?)
    }

    /// Replaces a server's transport and options.
    ///
    /// The enabled flag and tool overrides are kept; the live connection is
    /// evicted.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`], [`DispatchError::Validation`]
    /// for an invalid document or one naming another server, and repository
    /// failures.
    pub async fn update_server(
        &self,
        server_name: &str,
        document: ServerConfigDocument,
    ) -> DispatchResult<Arc<ServerDescriptor>> {
        let name = McpServerName::new(server_name)?;
        let requested = McpServerName::new(document.name.as_str())?;
        if requested != name {
            return Err(ToolRegistryDomainError::RenameNotSupported {
                current: name.as_str().to_owned(),
                requested: requested.as_str().to_owned(),
            }
            .into());
        }
        let transport = document.config.to_transport()?;
        let options = document.config.to_options()?;
        let clock = &*self.clock;
        let updated = self
            .store
            .modify(&name, |descriptor| {
                descriptor.reconfigure(transport, options, clock);
                Ok(())
            })
            .await?;
        self.pool.evict(&name).await;
        info!(server = %name, transport = %updated.transport_kind(), "MCP server reconfigured");
        Ok(updated)
    }

    /// Removes a server, then closes its connection.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] and repository failures; the
    /// connection is left alone when the removal fails.
    pub async fn delete_server(&self, server_name: &str) -> DispatchResult<()> {
        let name = McpServerName::new(server_name)?;
        self.store.remove(&name).await?;
        self.pool.evict(&name).await;
        Ok(())
    }

    /// Enables or disables a server; disabling closes its connection.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] and repository failures.
    pub async fn toggle_server(
        &self,
        server_name: &str,
        enabled: bool,
    ) -> DispatchResult<Arc<ServerDescriptor>> {
        let name = McpServerName::new(server_name)?;
        let clock = &*self.clock;
        let updated = self
            .store
            .modify(&name, |descriptor| {
                descriptor.set_enabled(enabled, clock);
                Ok(())
            })
            .await?;
        if !enabled {
            self.pool.evict(&name).await;
        }
        info!(server = %name, enabled, "MCP server toggled");
        Ok(updated)
    }

    /// Enables or disables one tool of a server.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`], [`DispatchError::Validation`]
    /// for a blank tool name, and repository failures.
    pub async fn toggle_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        enabled: bool,
    ) -> DispatchResult<Arc<ServerDescriptor>> {
        let name = McpServerName::new(server_name)?;
        let clock = &*self.clock;
        let updated = self
            .store
            .modify(&name, |descriptor| {
                descriptor.set_tool_enabled(tool_name, enabled, clock)
            })
            .await?;
        info!(server = %name, tool = tool_name, enabled, "MCP tool toggled");
        Ok(updated)
    }

    /// Sets or clears the description override of one tool.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`], [`DispatchError::Validation`]
    /// for a blank tool name, and repository failures.
    pub async fn update_tool_description(
        &self,
        server_name: &str,
        tool_name: &str,
        description: Option<String>,
    ) -> DispatchResult<Arc<ServerDescriptor>> {
        let name = McpServerName::new(server_name)?;
        let clock = &*self.clock;
        Ok(self
            .store
            .modify(&name, |descriptor| {
                descriptor.set_tool_description(tool_name, description, clock)
            })
            .await?)
    }

    /// Lists every server with its connection state, ordered by name.
    #[must_use]
    pub fn list_servers(&self) -> Vec<ServerStatus> {
        self.store
            .list()
            .into_iter()
            .map(|descriptor| self.status(descriptor))
            .collect()
    }

    /// Returns one server with its connection state.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] or a name validation error.
    pub fn get_server(&self, server_name: &str) -> DispatchResult<ServerStatus> {
        let name = McpServerName::new(server_name)?;
        let descriptor = self.store.get(&name).map_err(DispatchError::from)?;
        Ok(self.status(descriptor))
    }

    fn status(&self, descriptor: Arc<ServerDescriptor>) -> ServerStatus {
        let connection = self.pool.snapshot(descriptor.name());
        ServerStatus {
            descriptor,
            connection,
        }
    }

    /// Closes every live connection.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
