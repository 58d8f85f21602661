//! MCP server transport configuration value objects.

use super::{ParseTransportKindError, ToolRegistryDomainError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Transport mechanism used to reach a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Spawned local process speaking JSON-RPC over standard streams.
    #[serde(rename = "stdio")]
    Stdio,
    /// Legacy MCP HTTP+SSE transport.
    #[serde(rename = "sse")]
    Sse,
    /// Streamable HTTP transport.
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

impl TransportKind {
    /// Returns the canonical wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransportKind {
    type Error = ParseTransportKindError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" => Ok(Self::StreamableHttp),
            _ => Err(ParseTransportKindError(value.to_owned())),
        }
    }
}

/// Transport settings for an MCP server hosted as a local process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_directory: Option<String>,
}

impl StdioTransportConfig {
    /// Creates a new STDIO transport configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyStdioCommand`] when `command`
    /// is empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(ToolRegistryDomainError::EmptyStdioCommand);
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        })
    }

    /// Replaces command-line arguments, keeping their order.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::InvalidEnvironmentKey`] when a key
    /// is empty or contains `=`.
    pub fn with_env(
        mut self,
        values: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ToolRegistryDomainError> {
        let env: BTreeMap<String, String> = values.into_iter().collect();
        if let Some(invalid) = env
            .keys()
            .find(|key| key.trim().is_empty() || key.contains('='))
        {
            return Err(ToolRegistryDomainError::InvalidEnvironmentKey(
                invalid.clone(),
            ));
        }
        self.env = env;
        Ok(self)
    }

    /// Sets an explicit working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError::EmptyWorkingDirectory`] when the
    /// provided value is empty after trimming.
    pub fn with_working_directory(
        mut self,
        value: impl Into<String>,
    ) -> Result<Self, ToolRegistryDomainError> {
        let normalized = value.into().trim().to_owned();
        if normalized.is_empty() {
            return Err(ToolRegistryDomainError::EmptyWorkingDirectory);
        }

        self.working_directory = Some(normalized);
        Ok(self)
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the optional working directory.
    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }
}

/// Endpoint settings shared by the SSE and streamable HTTP transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpointConfig {
    url: String,
    headers: BTreeMap<String, String>,
}

impl HttpEndpointConfig {
    /// Creates a new endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when `url` is empty, does not
    /// parse, or is not an `http`/`https` URL.
    pub fn new(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        let normalized_url = url.into().trim().to_owned();
        if normalized_url.is_empty() {
            return Err(ToolRegistryDomainError::EmptyEndpointUrl);
        }

        let parsed = Url::parse(&normalized_url).map_err(|err| {
            ToolRegistryDomainError::InvalidEndpointUrl {
                url: normalized_url.clone(),
                reason: err.to_string(),
            }
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ToolRegistryDomainError::InvalidEndpointUrl {
                url: normalized_url,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self {
            url: normalized_url,
            headers: BTreeMap::new(),
        })
    }

    /// Replaces request headers.
    ///
    /// Header names are compared case-insensitively; the spelling supplied
    /// by the caller is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ToolRegistryDomainError`] when a name is not a valid HTTP
    /// token, a value carries control characters, or two names collide.
    pub fn with_headers(
        mut self,
        values: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ToolRegistryDomainError> {
        let mut seen = BTreeSet::new();
        let mut headers = BTreeMap::new();
        for (name, value) in values {
            let trimmed_name = name.trim().to_owned();
            if !is_http_token(&trimmed_name) {
                return Err(ToolRegistryDomainError::InvalidHeaderName(trimmed_name));
            }
            if value.chars().any(|character| character.is_ascii_control() && character != '\t') {
                return Err(ToolRegistryDomainError::InvalidHeaderValue(trimmed_name));
            }
            if !seen.insert(trimmed_name.to_ascii_lowercase()) {
                return Err(ToolRegistryDomainError::DuplicateHeader(trimmed_name));
            }
            headers.insert(trimmed_name, value);
        }
        self.headers = headers;
        Ok(self)
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns configured request headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

fn is_http_token(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|character| {
            character.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(character)
        })
}

/// Supported MCP transport configuration variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum McpTransport {
    /// MCP over local process STDIO.
    Stdio(StdioTransportConfig),
    /// MCP over the legacy HTTP+SSE transport.
    Sse(HttpEndpointConfig),
    /// MCP over streamable HTTP.
    StreamableHttp(HttpEndpointConfig),
}

impl McpTransport {
    /// Creates a `stdio` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StdioTransportConfig::new`].
    pub fn stdio(command: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Stdio(StdioTransportConfig::new(command)?))
    }

    /// Creates an `sse` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpEndpointConfig::new`].
    pub fn sse(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::Sse(HttpEndpointConfig::new(url)?))
    }

    /// Creates a `streamable-http` transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`HttpEndpointConfig::new`].
    pub fn streamable_http(url: impl Into<String>) -> Result<Self, ToolRegistryDomainError> {
        Ok(Self::StreamableHttp(HttpEndpointConfig::new(url)?))
    }

    /// Returns the transport kind selecting this variant.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Sse(_) => TransportKind::Sse,
            Self::StreamableHttp(_) => TransportKind::StreamableHttp,
        }
    }

    /// Returns the endpoint settings for network transports.
    #[must_use]
    pub const fn endpoint(&self) -> Option<&HttpEndpointConfig> {
        match self {
            Self::Stdio(_) => None,
            Self::Sse(endpoint) | Self::StreamableHttp(endpoint) => Some(endpoint),
        }
    }

    /// Re-checks the invariants of the populated variant.
    ///
    /// Values built through the constructors always pass; this guards data
    /// reconstructed from persistence.
    ///
    /// # Errors
    ///
    /// Returns the first [`ToolRegistryDomainError`] found.
    pub fn validate(&self) -> Result<(), ToolRegistryDomainError> {
        match self {
            Self::Stdio(config) => {
                let rebuilt = StdioTransportConfig::new(config.command())?
                    .with_env(config.env().clone())?;
                if let Some(directory) = config.working_directory() {
                    rebuilt.with_working_directory(directory)?;
                }
                Ok(())
            }
            Self::Sse(endpoint) | Self::StreamableHttp(endpoint) => {
                HttpEndpointConfig::new(endpoint.url())?.with_headers(endpoint.headers().clone())?;
                Ok(())
            }
        }
    }
}
