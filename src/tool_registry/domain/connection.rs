//! Connection lifecycle states and read-only connection snapshots.

use super::{ConnectionId, ParseConnectionStateError, ToolRegistryDomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a server's live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection has been attempted since enable.
    NoConnection,
    /// The transport adapter is opening a connection.
    Connecting,
    /// The connection is open and accepting calls.
    Ready,
    /// A transport-level failure was observed; the next call reconnects.
    Degraded,
    /// The connection was closed, failed to open, or was evicted.
    Closed,
}

impl ConnectionState {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoConnection => "no_connection",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }

    /// Returns whether transition to `target` is allowed.
    ///
    /// `Connecting -> Connecting` covers an open attempt whose caller was
    /// cancelled before the adapter answered.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::NoConnection | Self::Connecting | Self::Degraded | Self::Closed,
                Self::Connecting
            ) | (Self::Connecting, Self::Ready)
                | (Self::Ready, Self::Degraded)
                | (
                    Self::Connecting | Self::Ready | Self::Degraded,
                    Self::Closed
                )
        )
    }

    /// Returns the validated target state.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidStateTransition`] when the
    /// transition is not allowed.
    pub fn transition_to(self, target: Self) -> Result<Self, ToolRegistryDomainError> {
        if self.can_transition_to(target) {
            return Ok(target);
        }
        Err(ToolRegistryDomainError::InvalidStateTransition {
            from: self.as_str().to_owned(),
            to: target.as_str().to_owned(),
        })
    }

    /// Returns whether an open connection may be reused as-is.
    #[must_use]
    pub const fn is_reusable(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionState {
    type Error = ParseConnectionStateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "no_connection" => Ok(Self::NoConnection),
            "connecting" => Ok(Self::Connecting),
            "ready" => Ok(Self::Ready),
            "degraded" => Ok(Self::Degraded),
            "closed" => Ok(Self::Closed),
            _ => Err(ParseConnectionStateError(value.to_owned())),
        }
    }
}

/// Timestamped view of a server's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    state: ConnectionState,
    connection_id: Option<ConnectionId>,
    changed_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl ConnectionSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub const fn new(
        state: ConnectionState,
        connection_id: Option<ConnectionId>,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            state,
            connection_id,
            changed_at,
            last_error: None,
        }
    }

    /// Creates the snapshot of a server that never connected.
    #[must_use]
    pub const fn idle(changed_at: DateTime<Utc>) -> Self {
        Self::new(ConnectionState::NoConnection, None, changed_at)
    }

    /// Adds the last failure message.
    #[must_use]
    pub fn with_last_error(mut self, message: Option<&str>) -> Self {
        self.last_error = message
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        self
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the identifier of the current connection, if one is held.
    #[must_use]
    pub const fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    /// Returns when the state last changed.
    #[must_use]
    pub const fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Returns the last failure message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
