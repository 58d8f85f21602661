//! JSON settings file repository for server descriptors.
//!
//! Descriptors live in a single document shaped like
//! `{"mcpServers": {"<name>": {<config body>}}}`. Top-level keys other than
//! `mcpServers` are preserved across writes.

use crate::tool_registry::{
    domain::{
        McpServerName, PersistedServerDescriptor, ServerConfigBody, ServerConfigDocument,
        ServerDescriptor,
    },
    ports::{
        ServerDescriptorRepository, ServerDescriptorRepositoryError,
        ServerDescriptorRepositoryResult,
    },
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "mcp_settings.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    mcp_servers: BTreeMap<String, StoredServer>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredServer {
    #[serde(flatten)]
    config: ServerConfigBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

/// Server descriptor repository backed by a JSON file in a capability-scoped
/// directory.
///
/// Writes are serialized and replace the file through a rename, so readers
/// never observe a partially written document.
pub struct JsonFileServerDescriptorRepository<C>
where
    C: Clock + Send + Sync,
{
    dir: Arc<Dir>,
    file_name: Utf8PathBuf,
    clock: Arc<C>,
    write_lock: Mutex<()>,
}

impl<C> JsonFileServerDescriptorRepository<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a repository for `file_name` inside an opened directory.
    #[must_use]
    pub fn new(dir: Dir, file_name: impl Into<Utf8PathBuf>, clock: Arc<C>) -> Self {
        Self {
            dir: Arc::new(dir),
            file_name: file_name.into(),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens the directory at `path` with ambient authority.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDescriptorRepositoryError::Persistence`] when the
    /// directory cannot be opened.
    pub fn open(
        path: &Utf8Path,
        file_name: impl Into<Utf8PathBuf>,
        clock: Arc<C>,
    ) -> ServerDescriptorRepositoryResult<Self> {
        let dir = Dir::open_ambient_dir(path, ambient_authority())
            .map_err(ServerDescriptorRepositoryError::persistence)?;
        Ok(Self::new(dir, file_name, clock))
    }

    async fn read_file(&self) -> ServerDescriptorRepositoryResult<SettingsFile> {
        let dir = Arc::clone(&self.dir);
        let file_name = self.file_name.clone();
        let contents = tokio::task::spawn_blocking(move || dir.read_to_string(&file_name))
            .await
            .map_err(ServerDescriptorRepositoryError::persistence)?;

        match contents {
            Ok(text) if text.trim().is_empty() => Ok(SettingsFile::default()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(ServerDescriptorRepositoryError::invalid_persisted_data),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(err) => Err(ServerDescriptorRepositoryError::persistence(err)),
        }
    }

    async fn write_file(&self, settings: &SettingsFile) -> ServerDescriptorRepositoryResult<()> {
        let rendered = serde_json::to_string_pretty(settings)
            .map_err(ServerDescriptorRepositoryError::persistence)?;
        let dir = Arc::clone(&self.dir);
        let file_name = self.file_name.clone();
        let temp_name = Utf8PathBuf::from(format!("{file_name}.tmp"));

        tokio::task::spawn_blocking(move || {
            dir.write(&temp_name, rendered.as_bytes())?;
            dir.rename(&temp_name, &dir, &file_name)
        })
        .await
        .map_err(ServerDescriptorRepositoryError::persistence)?
        .map_err(ServerDescriptorRepositoryError::persistence)
    }

    fn restore(
        &self,
        name: String,
        stored: StoredServer,
    ) -> ServerDescriptorRepositoryResult<ServerDescriptor> {
        let validated = ServerConfigDocument::new(name, stored.config)
            .into_descriptor(&*self.clock)
            .map_err(ServerDescriptorRepositoryError::invalid_persisted_data)?;
        let created_at = stored.created_at.unwrap_or_else(|| validated.created_at());
        let updated_at = stored.updated_at.unwrap_or(created_at);

        Ok(ServerDescriptor::from_persisted(PersistedServerDescriptor {
            name: validated.name().clone(),
            transport: validated.transport().clone(),
            options: *validated.options(),
            enabled: validated.enabled(),
            tools: validated.tools().clone(),
            created_at,
            updated_at,
        }))
    }
}

#[async_trait]
impl<C> ServerDescriptorRepository for JsonFileServerDescriptorRepository<C>
where
    C: Clock + Send + Sync,
{
    async fn load_all(&self) -> ServerDescriptorRepositoryResult<Vec<ServerDescriptor>> {
        let settings = self.read_file().await?;
        settings
            .mcp_servers
            .into_iter()
            .map(|(name, stored)| self.restore(name, stored))
            .collect()
    }

    async fn save(&self, descriptor: &ServerDescriptor) -> ServerDescriptorRepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.read_file().await?;
        settings.mcp_servers.insert(
            descriptor.name().as_str().to_owned(),
            StoredServer {
                config: ServerConfigBody::from_descriptor(descriptor),
                created_at: Some(descriptor.created_at()),
                updated_at: Some(descriptor.updated_at()),
            },
        );
        self.write_file(&settings).await
    }

    async fn delete(&self, name: &McpServerName) -> ServerDescriptorRepositoryResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.read_file().await?;
        if settings.mcp_servers.remove(name.as_str()).is_none() {
            return Err(ServerDescriptorRepositoryError::NotFound(name.clone()));
        }
        self.write_file(&settings).await
    }
}
