//! Routes tool calls to live connections.

use super::{
    ConnectionPool, DescriptorStore, DispatchError, DispatchResult, GovernorError,
    InvocationDeadlines, Lease,
};
use crate::tool_registry::{
    domain::{
        McpServerName, ServerDescriptor, TimeoutClock, ToolCallRequest, ToolCallResult,
        ToolCatalogEntry, ToolRegistryDomainError,
    },
    ports::{ListToolsError, ServerDescriptorRepository, TransportError},
};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, instrument, warn};

/// The single entry point for tool calls.
pub struct Dispatcher<R, C>
where
    R: ServerDescriptorRepository,
    C: Clock + Send + Sync,
{
    store: Arc<DescriptorStore<R>>,
    pool: Arc<ConnectionPool<C>>,
}

impl<R, C> Clone for Dispatcher<R, C>
where
    R: ServerDescriptorRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<R, C> Dispatcher<R, C>
where
    R: ServerDescriptorRepository,
    C: Clock + Send + Sync,
{
    /// Creates a dispatcher over a store and a pool.
    #[must_use]
    pub const fn new(store: Arc<DescriptorStore<R>>, pool: Arc<ConnectionPool<C>>) -> Self {
        Self { store, pool }
    }

    fn resolve(&self, server_name: &str) -> DispatchResult<Arc<ServerDescriptor>> {
        let name = McpServerName::new(server_name)?;
        let descriptor = self.store.get(&name)?;
        if !descriptor.enabled() {
            return Err(DispatchError::NotFound(name));
        }
        Ok(descriptor)
    }

    async fn lease(&self, descriptor: &ServerDescriptor) -> DispatchResult<Lease> {
        let name = descriptor.name();
        Ok(self.pool.acquire(name, || self.store.get(name).ok()).await?)
    }

    async fn report(&self, descriptor: &ServerDescriptor, lease: &Lease, err: &TransportError) {
        self.pool
            .report_failure(descriptor.name(), lease.connection_id(), err)
            .await;
    }

    /// Calls `tool_name` on `server_name` and returns its final result.
    ///
    /// The call deadline and the total deadline start once a connection is
    /// leased and also bound the wait for an exclusive connection. Transport
    /// failures degrade the connection; timeouts do not. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] describing why no result was produced.
    #[instrument(
        name = "dispatch",
        skip(self, arguments),
        fields(server = server_name, tool = tool_name),
        err
    )]
    pub async fn dispatch(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
    ) -> DispatchResult<ToolCallResult> {
        let descriptor = self.resolve(server_name)?;
        let tool = tool_name.trim();
        if tool.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName.into());
        }
        if !descriptor.tool_enabled(tool) {
            return Err(DispatchError::ToolDisabled {
                server: descriptor.name().clone(),
                tool: tool.to_owned(),
            });
        }

        let lease = self.lease(&descriptor).await?;
        let kind = descriptor.transport_kind();
        let deadlines = InvocationDeadlines::start(descriptor.options());
        let _permit = deadlines
            .bound(lease.enter())
            .await
            .map_err(|clock| timed_out(&descriptor, tool, clock))?
            .map_err(|err| DispatchError::from_gate(descriptor.name(), kind, err))?;

        let events = lease
            .connection()
            .invoke(ToolCallRequest::new(tool, arguments));
        let outcome = deadlines
            .supervise(kind, events)
            .instrument(info_span!("invoke", connection_id = %lease.connection_id()))
            .await;
        match outcome {
            Ok(result) => {
                info!(is_error = result.is_error(), "tool call completed");
                Ok(result)
            }
            Err(GovernorError::Transport(err)) => {
                self.report(&descriptor, &lease, &err).await;
                Err(err.into())
            }
            Err(GovernorError::TimedOut { clock }) => {
                Err(timed_out(&descriptor, tool, clock))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Returns the server's tool catalog with local overrides applied.
    ///
    /// Bounded by the server's call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the server is unknown or disabled, the
    /// connection fails, the deadline fires, or the server answers with an
    /// error.
    #[instrument(name = "list_tools", skip(self), fields(server = server_name), err)]
    pub async fn list_tools(&self, server_name: &str) -> DispatchResult<Vec<ToolCatalogEntry>> {
        let descriptor = self.resolve(server_name)?;
        let lease = self.lease(&descriptor).await?;
        let kind = descriptor.transport_kind();

        let listing = tokio::time::timeout(descriptor.options().call_timeout(), async {
            let _permit = lease
                .enter()
                .await
                .map_err(|err| DispatchError::from_gate(descriptor.name(), kind, err))?;
            Ok::<_, DispatchError>(lease.connection().list_tools().await)
        })
        .await
        .map_err(|_| timed_out(&descriptor, "tools/list", TimeoutClock::Call))??;

        match listing {
            Ok(definitions) => Ok(definitions
                .into_iter()
                .map(|definition| {
                    let tool_override = descriptor.tool_override(definition.name());
                    ToolCatalogEntry::merge(definition, tool_override)
                })
                .collect()),
            Err(ListToolsError::Transport(err)) => {
                self.report(&descriptor, &lease, &err).await;
                Err(err.into())
            }
            Err(ListToolsError::Downstream(fault)) => Err(DispatchError::Downstream(fault)),
        }
    }
}

fn timed_out(descriptor: &ServerDescriptor, tool: &str, clock: TimeoutClock) -> DispatchError {
    warn!(
        server = %descriptor.name(),
        tool,
        %clock,
        "tool call timed out"
    );
    DispatchError::TimedOut { clock }
}
