//! Per-server connection lifecycle.
//!
//! Each server owns a slot guarded by its own async mutex, so an open for
//! one server never blocks work on another. The map of slots is locked only
//! to look up or insert a slot.

use crate::config::ExclusiveCallPolicy;
use crate::tool_registry::{
    adapters::TransportRegistry,
    domain::{ConnectionId, ConnectionSnapshot, ConnectionState, McpServerName, ServerDescriptor},
    ports::{
        CallConcurrency, TransportConnection, TransportError, TransportFailure,
    },
};
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Why a call could not enter a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    /// The exclusive connection is busy and the policy rejects waiting.
    #[error("connection is busy")]
    Busy,
    /// The connection was closed while the call waited.
    #[error("connection closed while waiting")]
    Closed,
}

/// Why [`ConnectionPool::acquire`] handed out no lease.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    /// The server was removed or disabled before a connection was leased.
    #[error("MCP server '{0}' is no longer available")]
    Withdrawn(McpServerName),
    /// Opening the connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Admission control for calls on one connection.
#[derive(Debug)]
pub struct CallGate {
    slots: Option<Arc<Semaphore>>,
    policy: ExclusiveCallPolicy,
}

/// Held for the duration of one call.
#[derive(Debug)]
pub struct CallPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl CallGate {
    /// Creates a gate matching the connection's concurrency.
    #[must_use]
    pub fn new(concurrency: CallConcurrency, policy: ExclusiveCallPolicy) -> Self {
        let slots = match concurrency {
            CallConcurrency::Exclusive => Some(Arc::new(Semaphore::new(1))),
            CallConcurrency::Multiplexed => None,
        };
        Self { slots, policy }
    }

    /// Admits one call; waiting callers are served in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Busy`] under the reject policy when a call is in
    /// flight and [`GateError::Closed`] when the gate is shut.
    pub async fn enter(&self) -> Result<CallPermit, GateError> {
        let Some(slots) = &self.slots else {
            return Ok(CallPermit { _permit: None });
        };
        let permit = match self.policy {
            ExclusiveCallPolicy::Queue => Arc::clone(slots)
                .acquire_owned()
                .await
                .map_err(|_| GateError::Closed)?,
            ExclusiveCallPolicy::Reject => {
                Arc::clone(slots)
                    .try_acquire_owned()
                    .map_err(|err| match err {
                        TryAcquireError::NoPermits => GateError::Busy,
                        TryAcquireError::Closed => GateError::Closed,
                    })?
            }
        };
        Ok(CallPermit {
            _permit: Some(permit),
        })
    }

    fn shut(&self) {
        if let Some(slots) = &self.slots {
            slots.close();
        }
    }
}

/// A usable connection handed out by [`ConnectionPool::acquire`].
#[derive(Clone)]
pub struct Lease {
    connection: Arc<dyn TransportConnection>,
    gate: Arc<CallGate>,
}

impl Lease {
    /// Returns the leased connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<dyn TransportConnection> {
        &self.connection
    }

    /// Returns the identifier of the leased connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Waits for admission through the connection's call gate.
    ///
    /// # Errors
    ///
    /// See [`CallGate::enter`].
    pub async fn enter(&self) -> Result<CallPermit, GateError> {
        self.gate.enter().await
    }
}

struct LiveConnection {
    connection: Arc<dyn TransportConnection>,
    gate: Arc<CallGate>,
}

struct SlotState {
    state: ConnectionState,
    live: Option<LiveConnection>,
}

struct Slot {
    inner: tokio::sync::Mutex<SlotState>,
    snapshot: RwLock<ConnectionSnapshot>,
}

/// Settings the pool needs from [`crate::config::DispatchSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Bound on opening a connection.
    pub connect_timeout: Duration,
    /// Admission policy for exclusive connections.
    pub exclusive_call_policy: ExclusiveCallPolicy,
}

impl From<&crate::config::DispatchSettings> for PoolSettings {
    fn from(settings: &crate::config::DispatchSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            exclusive_call_policy: settings.exclusive_call_policy,
        }
    }
}

/// Opens, reuses, replaces and closes connections per server.
pub struct ConnectionPool<C>
where
    C: Clock + Send + Sync,
{
    transports: TransportRegistry,
    settings: PoolSettings,
    clock: Arc<C>,
    slots: Mutex<BTreeMap<McpServerName, Arc<Slot>>>,
}

impl<C> ConnectionPool<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty pool.
    #[must_use]
    pub fn new(transports: TransportRegistry, settings: PoolSettings, clock: Arc<C>) -> Self {
        Self {
            transports,
            settings,
            clock,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    fn slot(&self, name: &McpServerName) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(name.clone()).or_insert_with(|| {
            Arc::new(Slot {
                inner: tokio::sync::Mutex::new(SlotState {
                    state: ConnectionState::NoConnection,
                    live: None,
                }),
                snapshot: RwLock::new(ConnectionSnapshot::idle(self.clock.utc())),
            })
        });
        Arc::clone(slot)
    }

    fn existing_slot(&self, name: &McpServerName) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn transition(
        &self,
        name: &McpServerName,
        slot: &Slot,
        current: &mut SlotState,
        target: ConnectionState,
        last_error: Option<&str>,
    ) {
        let next = match current.state.transition_to(target) {
            Ok(next) => next,
            Err(err) => {
                warn!(server = %name, error = %err, "forcing connection state");
                target
            }
        };
        debug!(server = %name, from = %current.state, to = %next, "connection state changed");
        current.state = next;
        let connection_id = current.live.as_ref().map(|live| live.connection.id());
        let snapshot = ConnectionSnapshot::new(next, connection_id, self.clock.utc())
            .with_last_error(last_error);
        *slot.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Returns a lease on a ready connection, opening one when needed.
    ///
    /// `current` is read under the server's slot lock and must return the
    /// stored descriptor; a missing or disabled one yields no lease, so a
    /// connection is never opened after the server was withdrawn. A degraded
    /// connection is closed and replaced. Concurrent callers for one server
    /// share a single open attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Withdrawn`] for a removed or disabled server,
    /// and [`AcquireError::Transport`] when no adapter serves the transport,
    /// the open fails, or it exceeds the connect timeout.
    pub async fn acquire<F>(
        &self,
        name: &McpServerName,
        current: F,
    ) -> Result<Lease, AcquireError>
    where
        F: FnOnce() -> Option<Arc<ServerDescriptor>> + Send,
    {
        let slot = self.slot(name);
        let mut held = slot.inner.lock().await;
        let Some(descriptor) = current().filter(|stored| stored.enabled()) else {
            debug!(server = %name, "server withdrawn before a connection was leased");
            return Err(AcquireError::Withdrawn(name.clone()));
        };
        let kind = descriptor.transport_kind();

        if held.state.is_reusable()
            && let Some(live) = &held.live
        {
            return Ok(Lease {
                connection: Arc::clone(&live.connection),
                gate: Arc::clone(&live.gate),
            });
        }

        let adapter = self.transports.get(kind).ok_or_else(|| {
            TransportError::protocol(kind, format!("no adapter registered for {kind}"))
        })?;

        if let Some(stale) = held.live.take() {
            info!(
                server = %name,
                connection_id = %stale.connection.id(),
                "replacing degraded connection"
            );
            close_live(stale).await;
        }
        self.transition(name, &slot, &mut held, ConnectionState::Connecting, None);

        let connect_timeout = self.settings.connect_timeout;
        let opened = tokio::time::timeout(connect_timeout, adapter.open(&descriptor))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::new(
                    kind,
                    TransportFailure::ConnectTimeout {
                        timeout_ms: u64::try_from(connect_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    },
                ))
            });

        match opened {
            Ok(connection) => {
                let gate = Arc::new(CallGate::new(
                    connection.concurrency(),
                    self.settings.exclusive_call_policy,
                ));
                info!(
                    server = %name,
                    transport = %kind,
                    connection_id = %connection.id(),
                    "connection ready"
                );
                held.live = Some(LiveConnection {
                    connection: Arc::clone(&connection),
                    gate: Arc::clone(&gate),
                });
                self.transition(name, &slot, &mut held, ConnectionState::Ready, None);
                Ok(Lease { connection, gate })
            }
            Err(err) => {
                warn!(server = %name, transport = %kind, error = %err, "connection failed");
                let message = err.to_string();
                self.transition(
                    name,
                    &slot,
                    &mut held,
                    ConnectionState::Closed,
                    Some(&message),
                );
                Err(err.into())
            }
        }
    }

    /// Marks the connection degraded if `connection_id` is still current.
    pub async fn report_failure(
        &self,
        name: &McpServerName,
        connection_id: ConnectionId,
        error: &TransportError,
    ) {
        let Some(slot) = self.existing_slot(name) else {
            return;
        };
        let mut current = slot.inner.lock().await;
        let is_current = current
            .live
            .as_ref()
            .is_some_and(|live| live.connection.id() == connection_id);
        if current.state != ConnectionState::Ready || !is_current {
            debug!(
                server = %name,
                connection_id = %connection_id,
                "ignoring failure of a replaced connection"
            );
            return;
        }
        warn!(
            server = %name,
            connection_id = %connection_id,
            error = %error,
            "connection degraded"
        );
        let message = error.to_string();
        self.transition(
            name,
            &slot,
            &mut current,
            ConnectionState::Degraded,
            Some(&message),
        );
    }

    /// Closes the server's connection and marks it closed.
    ///
    /// Returns whether a live connection was closed.
    pub async fn evict(&self, name: &McpServerName) -> bool {
        let Some(slot) = self.existing_slot(name) else {
            return false;
        };
        let mut current = slot.inner.lock().await;
        let live = current.live.take();
        let closed = live.is_some();
        if let Some(connection) = live {
            info!(
                server = %name,
                connection_id = %connection.connection.id(),
                "evicting connection"
            );
            close_live(connection).await;
        }
        if current.state.can_transition_to(ConnectionState::Closed) {
            self.transition(name, &slot, &mut current, ConnectionState::Closed, None);
        }
        closed
    }

    /// Evicts every server.
    pub async fn shutdown(&self) {
        let names: Vec<McpServerName> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for name in &names {
            self.evict(name).await;
        }
        info!(servers = names.len(), "connection pool shut down");
    }

    /// Returns the connection state of one server.
    #[must_use]
    pub fn snapshot(&self, name: &McpServerName) -> ConnectionSnapshot {
        self.existing_slot(name).map_or_else(
            || ConnectionSnapshot::idle(self.clock.utc()),
            |slot| {
                slot.snapshot
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            },
        )
    }

    /// Returns the connection state of every server seen so far.
    #[must_use]
    pub fn snapshots(&self) -> BTreeMap<McpServerName, ConnectionSnapshot> {
        let slots: Vec<(McpServerName, Arc<Slot>)> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .map(|(name, slot)| {
                let snapshot = slot
                    .snapshot
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                (name, snapshot)
            })
            .collect()
    }
}

async fn close_live(live: LiveConnection) {
    live.gate.shut();
    live.connection.close().await;
}
