//! MCP tool definitions and per-tool registry overrides.

use super::ToolRegistryDomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical metadata for a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    name: String,
    description: Option<String>,
    input_schema: Value,
}

impl McpToolDefinition {
    /// Creates a tool definition.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyToolName`] when the name is
    /// empty after trimming.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
    ) -> Result<Self, ToolRegistryDomainError> {
        let normalized_name = name.into().trim().to_owned();
        if normalized_name.is_empty() {
            return Err(ToolRegistryDomainError::EmptyToolName);
        }

        let normalized_description = description
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());

        Ok(Self {
            name: normalized_name,
            description: normalized_description,
            input_schema,
        })
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool description reported by the server.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

/// Registry-side settings for one tool of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    enabled: bool,
    description: Option<String>,
}

impl Default for ToolOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            description: None,
        }
    }
}

impl ToolOverride {
    /// Creates an override with the given flag and description.
    #[must_use]
    pub fn new(enabled: bool, description: Option<String>) -> Self {
        Self {
            enabled,
            description: description
                .map(|text| text.trim().to_owned())
                .filter(|text| !text.is_empty()),
        }
    }

    /// Returns whether the tool may be invoked.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the description override, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns whether this override changes nothing.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.enabled && self.description.is_none()
    }

    pub(crate) const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_description(&mut self, description: Option<String>) {
        self.description = description
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
    }
}

/// A discovered tool with registry overrides applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCatalogEntry {
    definition: McpToolDefinition,
    enabled: bool,
    description: Option<String>,
}

impl ToolCatalogEntry {
    /// Merges a discovered definition with its optional override.
    #[must_use]
    pub fn merge(definition: McpToolDefinition, tool_override: Option<&ToolOverride>) -> Self {
        let enabled = tool_override.is_none_or(ToolOverride::enabled);
        let description = tool_override
            .and_then(ToolOverride::description)
            .or_else(|| definition.description())
            .map(str::to_owned);
        Self {
            definition,
            enabled,
            description,
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Returns the effective description (override first).
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns whether the tool is enabled in the registry.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the definition reported by the server.
    #[must_use]
    pub const fn definition(&self) -> &McpToolDefinition {
        &self.definition
    }
}
