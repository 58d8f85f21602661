//! Wire shape of server configuration documents.
//!
//! Configuration arrives from the management UI as
//! `{ name, config: { type, command, args, env, url, headers, options } }`.
//! This module converts that loosely-typed shape into a validated
//! [`ServerDescriptor`] and back without loss.

use super::{
    DEFAULT_CALL_TIMEOUT_MS, HttpEndpointConfig, InvocationOptions, McpServerName, McpTransport,
    ServerDescriptor, StdioTransportConfig, ToolOverride, ToolRegistryDomainError, TransportKind,
};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named server configuration as exchanged with the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfigDocument {
    /// Server name.
    pub name: String,
    /// Server configuration body.
    pub config: ServerConfigBody,
}

/// Transport, option and override fields of a server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigBody {
    /// Transport type: `stdio`, `sse` or `streamable-http`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,
    /// Executable for process servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Ordered arguments for process servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variables for process servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Working directory for process servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Endpoint URL for network servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request headers for network servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Timeout options; only non-default values are emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptionsBody>,
    /// Enabled flag; absent means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Per-tool overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, ToolOverrideBody>>,
}

/// Timeout option fields of a configuration body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptionsBody {
    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Whether progress restarts the per-call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_timeout_on_progress: Option<bool>,
    /// Absolute ceiling in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_timeout: Option<u64>,
}

/// Per-tool override fields of a configuration body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverrideBody {
    /// Enabled flag; absent means enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Description override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerConfigBody {
    /// Resolves the transport kind, applying the legacy `url` shorthand.
    ///
    /// An explicit `type` wins. Without one, a `url` selects `sse` and
    /// anything else selects `stdio`. The shorthand is frozen to `sse`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::UnknownTransportType`] for an
    /// unrecognised `type`.
    pub fn transport_kind(&self) -> Result<TransportKind, ToolRegistryDomainError> {
        match self.transport_type.as_deref() {
            Some(name) => TransportKind::try_from(name)
                .map_err(|err| ToolRegistryDomainError::UnknownTransportType(err.0)),
            None if has_text(self.url.as_deref()) => Ok(TransportKind::Sse),
            None => Ok(TransportKind::Stdio),
        }
    }

    /// Builds the validated transport variant.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::ConflictingTransportFields`] when
    /// process and endpoint fields are mixed, and variant validation errors
    /// otherwise.
    pub fn to_transport(&self) -> Result<McpTransport, ToolRegistryDomainError> {
        let process_fields = self.populated_process_fields();
        let endpoint_fields = self.populated_endpoint_fields();
        if !process_fields.is_empty() && !endpoint_fields.is_empty() {
            return Err(ToolRegistryDomainError::ConflictingTransportFields {
                process_fields: process_fields.join(", "),
                endpoint_fields: endpoint_fields.join(", "),
            });
        }

        match self.transport_kind()? {
            TransportKind::Stdio => {
                if !endpoint_fields.is_empty() {
                    return Err(ToolRegistryDomainError::ConflictingTransportFields {
                        process_fields: String::from("type"),
                        endpoint_fields: endpoint_fields.join(", "),
                    });
                }
                self.to_stdio().map(McpTransport::Stdio)
            }
            kind @ (TransportKind::Sse | TransportKind::StreamableHttp) => {
                if !process_fields.is_empty() {
                    return Err(ToolRegistryDomainError::ConflictingTransportFields {
                        process_fields: process_fields.join(", "),
                        endpoint_fields: String::from("type"),
                    });
                }
                let endpoint = self.to_endpoint()?;
                Ok(if kind == TransportKind::Sse {
                    McpTransport::Sse(endpoint)
                } else {
                    McpTransport::StreamableHttp(endpoint)
                })
            }
        }
    }

    /// Builds validated timeout options, filling defaults.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`InvocationOptions::new`].
    pub fn to_options(&self) -> Result<InvocationOptions, ToolRegistryDomainError> {
        let body = self.options.clone().unwrap_or_default();
        InvocationOptions::new(
            body.timeout.unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
            body.reset_timeout_on_progress.unwrap_or(false),
            body.max_total_timeout,
        )
    }

    /// Returns the per-tool overrides carried by the body.
    #[must_use]
    pub fn to_tool_overrides(&self) -> BTreeMap<String, ToolOverride> {
        self.tools
            .iter()
            .flatten()
            .map(|(name, body)| {
                (
                    name.trim().to_owned(),
                    ToolOverride::new(body.enabled.unwrap_or(true), body.description.clone()),
                )
            })
            .collect()
    }

    fn to_stdio(&self) -> Result<StdioTransportConfig, ToolRegistryDomainError> {
        let mut config = StdioTransportConfig::new(self.command.clone().unwrap_or_default())?
            .with_args(self.args.clone().unwrap_or_default())
            .with_env(self.env.clone().unwrap_or_default())?;
        if let Some(directory) = self.cwd.as_deref() {
            config = config.with_working_directory(directory)?;
        }
        Ok(config)
    }

    fn to_endpoint(&self) -> Result<HttpEndpointConfig, ToolRegistryDomainError> {
        HttpEndpointConfig::new(self.url.clone().unwrap_or_default())?
            .with_headers(self.headers.clone().unwrap_or_default())
    }

    fn populated_process_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if has_text(self.command.as_deref()) {
            fields.push("command");
        }
        if self.args.as_ref().is_some_and(|args| !args.is_empty()) {
            fields.push("args");
        }
        if self.env.as_ref().is_some_and(|env| !env.is_empty()) {
            fields.push("env");
        }
        if has_text(self.cwd.as_deref()) {
            fields.push("cwd");
        }
        fields
    }

    fn populated_endpoint_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if has_text(self.url.as_deref()) {
            fields.push("url");
        }
        if self.headers.as_ref().is_some_and(|headers| !headers.is_empty()) {
            fields.push("headers");
        }
        fields
    }

    /// Renders a descriptor as a configuration body.
    #[must_use]
    pub fn from_descriptor(descriptor: &ServerDescriptor) -> Self {
        let mut body = Self {
            transport_type: Some(descriptor.transport_kind().as_str().to_owned()),
            enabled: Some(descriptor.enabled()),
            options: render_options(descriptor.options()),
            ..Self::default()
        };

        match descriptor.transport() {
            McpTransport::Stdio(config) => {
                body.command = Some(config.command().to_owned());
                body.args = Some(config.args().to_vec());
                body.env = non_empty(config.env().clone());
                body.cwd = config.working_directory().map(str::to_owned);
            }
            McpTransport::Sse(endpoint) | McpTransport::StreamableHttp(endpoint) => {
                body.url = Some(endpoint.url().to_owned());
                body.headers = non_empty(endpoint.headers().clone());
            }
        }

        let tools: BTreeMap<String, ToolOverrideBody> = descriptor
            .tools()
            .iter()
            .map(|(name, tool_override)| {
                (
                    name.clone(),
                    ToolOverrideBody {
                        enabled: Some(tool_override.enabled()),
                        description: tool_override.description().map(str::to_owned),
                    },
                )
            })
            .collect();
        body.tools = non_empty(tools);
        body
    }
}

impl ServerConfigDocument {
    /// Creates a document.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ServerConfigBody) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Validates the document into a new descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`ToolRegistryDomainError`] found.
    pub fn into_descriptor(
        self,
        clock: &impl Clock,
    ) -> Result<ServerDescriptor, ToolRegistryDomainError> {
        let name = McpServerName::new(self.name)?;
        let transport = self.config.to_transport()?;
        let options = self.config.to_options()?;
        let descriptor = ServerDescriptor::new(name, transport, clock)
            .with_options(options)
            .with_enabled(self.config.enabled.unwrap_or(true))
            .with_tools(self.config.to_tool_overrides());
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Renders a descriptor as a document.
    #[must_use]
    pub fn from_descriptor(descriptor: &ServerDescriptor) -> Self {
        Self::new(
            descriptor.name().as_str(),
            ServerConfigBody::from_descriptor(descriptor),
        )
    }
}

fn render_options(options: &InvocationOptions) -> Option<RequestOptionsBody> {
    if options.is_default() {
        return None;
    }
    Some(RequestOptionsBody {
        timeout: (options.call_timeout_ms() != DEFAULT_CALL_TIMEOUT_MS)
            .then_some(options.call_timeout_ms()),
        reset_timeout_on_progress: options.reset_timeout_on_progress().then_some(true),
        max_total_timeout: options.max_total_timeout_ms(),
    })
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|text| !text.trim().is_empty())
}

fn non_empty<K, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}
