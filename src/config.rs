//! Dispatch settings loaded from TOML.

use crate::tool_registry::adapters::ClientInfo;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default bound on opening a connection, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default wait for a process to exit before it is killed, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Default MCP protocol revision announced during the handshake.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// What a second call does while an exclusive connection is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusiveCallPolicy {
    /// Wait in FIFO order for the connection.
    #[default]
    Queue,
    /// Fail immediately with a busy error.
    Reject,
}

/// Tunables for connection management and the MCP handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchSettings {
    /// Admission policy for exclusive connections.
    pub exclusive_call_policy: ExclusiveCallPolicy,
    /// Bound on opening a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Wait for a process to exit before it is killed, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Client name announced during the handshake.
    pub client_name: String,
    /// Client version announced during the handshake.
    pub client_version: String,
    /// Protocol revision announced during the handshake.
    pub protocol_version: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            exclusive_call_policy: ExclusiveCallPolicy::Queue,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
        }
    }
}

/// Errors raised while loading settings.
#[derive(Debug, Clone, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Read(Arc<std::io::Error>),
    /// The settings file is not valid TOML for these settings.
    #[error("invalid settings file: {0}")]
    Parse(Arc<toml::de::Error>),
    /// A timeout setting is zero.
    #[error("{field} must be positive")]
    NonPositive {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl DispatchSettings {
    /// Parses settings from TOML text; absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed TOML or unknown keys
    /// and [`SettingsError::NonPositive`] for zero timeouts.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            toml::from_str(text).map_err(|err| SettingsError::Parse(Arc::new(err)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `file_name` from `dir`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the file cannot be read or parsed.
    pub fn load(dir: &Dir, file_name: &str) -> Result<Self, SettingsError> {
        match dir.read_to_string(file_name) {
            Ok(text) => Self::from_toml(&text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(SettingsError::Read(Arc::new(err))),
        }
    }

    /// Checks that timeouts are positive.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NonPositive`] naming the first zero field.
    pub const fn validate(&self) -> Result<(), SettingsError> {
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::NonPositive {
                field: "connect_timeout_ms",
            });
        }
        if self.shutdown_grace_ms == 0 {
            return Err(SettingsError::NonPositive {
                field: "shutdown_grace_ms",
            });
        }
        Ok(())
    }

    /// Bound on opening a connection.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Wait for a process to exit before it is killed.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Client identity announced during the handshake.
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
            protocol_version: self.protocol_version.clone(),
        }
    }
}
