//! Server descriptor aggregate root.

use super::{
    InvocationOptions, McpServerName, McpTransport, ToolOverride, ToolRegistryDomainError,
    TransportKind,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative configuration for one registered MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    name: McpServerName,
    transport: McpTransport,
    options: InvocationOptions,
    enabled: bool,
    tools: BTreeMap<String, ToolOverride>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedServerDescriptor {
    /// Persisted server name.
    pub name: McpServerName,
    /// Persisted transport settings.
    pub transport: McpTransport,
    /// Persisted timeout options.
    pub options: InvocationOptions,
    /// Persisted enabled flag.
    pub enabled: bool,
    /// Persisted per-tool overrides.
    pub tools: BTreeMap<String, ToolOverride>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ServerDescriptor {
    /// Creates a new enabled descriptor with default options.
    #[must_use]
    pub fn new(name: McpServerName, transport: McpTransport, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            name,
            transport,
            options: InvocationOptions::default(),
            enabled: true,
            tools: BTreeMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a descriptor from persistence.
    #[must_use]
    pub fn from_persisted(data: PersistedServerDescriptor) -> Self {
        Self {
            name: data.name,
            transport: data.transport,
            options: data.options,
            enabled: data.enabled,
            tools: data.tools,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Sets timeout options.
    #[must_use]
    pub const fn with_options(mut self, options: InvocationOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replaces per-tool overrides, dropping entries that change nothing.
    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = (String, ToolOverride)>) -> Self {
        self.tools = tools
            .into_iter()
            .filter(|(_, tool_override)| !tool_override.is_default())
            .collect();
        self
    }

    /// Returns the server name.
    #[must_use]
    pub const fn name(&self) -> &McpServerName {
        &self.name
    }

    /// Returns the transport settings.
    #[must_use]
    pub const fn transport(&self) -> &McpTransport {
        &self.transport
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Returns the timeout options.
    #[must_use]
    pub const fn options(&self) -> &InvocationOptions {
        &self.options
    }

    /// Returns whether the server is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the per-tool overrides.
    #[must_use]
    pub const fn tools(&self) -> &BTreeMap<String, ToolOverride> {
        &self.tools
    }

    /// Returns the override for one tool, if any.
    #[must_use]
    pub fn tool_override(&self, tool_name: &str) -> Option<&ToolOverride> {
        self.tools.get(tool_name)
    }

    /// Returns whether a tool may be invoked.
    #[must_use]
    pub fn tool_enabled(&self, tool_name: &str) -> bool {
        self.tool_override(tool_name)
            .is_none_or(ToolOverride::enabled)
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Re-checks every descriptor invariant.
    ///
    /// # Errors
    ///
    /// Returns the first [`ToolRegistryDomainError`] found.
    pub fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        self.transport.validate()?;
        self.options.validate()?;
        if self.tools.keys().any(|tool| tool.trim().is_empty()) {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }
        Ok(())
    }

    /// Replaces transport and options, keeping identity, flags and overrides.
    pub fn reconfigure(
        &mut self,
        transport: McpTransport,
        options: InvocationOptions,
        clock: &impl Clock,
    ) {
        self.transport = transport;
        self.options = options;
        self.touch(clock);
    }

    /// Enables or disables the server.
    pub fn set_enabled(&mut self, enabled: bool, clock: &impl Clock) {
        self.enabled = enabled;
        self.touch(clock);
    }

    /// Enables or disables one tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyToolName`] for a blank name.
    pub fn set_tool_enabled(
        &mut self,
        tool_name: &str,
        enabled: bool,
        clock: &impl Clock,
    ) -> Result<(), ToolRegistryDomainError> {
        self.update_tool(tool_name, clock, |tool_override| {
            tool_override.set_enabled(enabled);
        })
    }

    /// Sets or clears the description override of one tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyToolName`] for a blank name.
    pub fn set_tool_description(
        &mut self,
        tool_name: &str,
        description: Option<String>,
        clock: &impl Clock,
    ) -> Result<(), ToolRegistryDomainError> {
        self.update_tool(tool_name, clock, |tool_override| {
            tool_override.set_description(description);
        })
    }

    fn update_tool(
        &mut self,
        tool_name: &str,
        clock: &impl Clock,
        change: impl FnOnce(&mut ToolOverride),
    ) -> Result<(), ToolRegistryDomainError> {
        let normalized = tool_name.trim();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }

        let mut tool_override = self.tools.remove(normalized).unwrap_or_default();
        change(&mut tool_override);
        if !tool_override.is_default() {
            self.tools.insert(normalized.to_owned(), tool_override);
        }
        self.touch(clock);
        Ok(())
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
