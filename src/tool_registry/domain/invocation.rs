//! Tool invocation requests, results and in-flight events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::time::Instant;

/// A request to run one tool on one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    tool_name: String,
    arguments: Value,
}

impl ToolCallRequest {
    /// Creates a request; `Null` arguments are sent as an empty object.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        let normalized_arguments = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };
        Self {
            tool_name: tool_name.into(),
            arguments: normalized_arguments,
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Returns the opaque arguments payload.
    #[must_use]
    pub const fn arguments(&self) -> &Value {
        &self.arguments
    }
}

/// Structured success payload returned by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallResult(Value);

impl ToolCallResult {
    /// Wraps a result payload.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.0
    }

    /// Consumes the result, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.0
    }

    /// Returns whether the payload flags an application-level failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.0
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Application-level failure reported by the tool server itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DownstreamFault {
    /// A JSON-RPC error object.
    RpcError {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional error data, passed through untouched.
        data: Option<Value>,
    },
    /// A tool result flagged with `isError: true`.
    ToolError {
        /// The complete result payload.
        payload: Value,
    },
}

impl fmt::Display for DownstreamFault {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RpcError { code, message, .. } => {
                write!(formatter, "tool server error {code}: {message}")
            }
            Self::ToolError { .. } => formatter.write_str("tool reported an error result"),
        }
    }
}

/// Liveness event for an in-flight call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSignal {
    received_at: Instant,
    progress: Option<f64>,
    total: Option<f64>,
    message: Option<String>,
}

impl ProgressSignal {
    /// Creates a signal stamped with the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self {
            received_at: Instant::now(),
            progress: None,
            total: None,
            message: None,
        }
    }

    /// Creates a signal from a downstream `notifications/progress` payload.
    #[must_use]
    pub fn from_notification(params: &Value) -> Self {
        Self {
            received_at: Instant::now(),
            progress: params.get("progress").and_then(Value::as_f64),
            total: params.get("total").and_then(Value::as_f64),
            message: params
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }

    /// Returns when the signal arrived.
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Returns the reported progress value, if any.
    #[must_use]
    pub const fn progress(&self) -> Option<f64> {
        self.progress
    }

    /// Returns the reported total, if any.
    #[must_use]
    pub const fn total(&self) -> Option<f64> {
        self.total
    }

    /// Returns the reported message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// One event of an in-flight invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationEvent {
    /// The call is still alive.
    Progress(ProgressSignal),
    /// The call completed successfully.
    Completed(ToolCallResult),
    /// The tool server answered with an application-level failure.
    Rejected(DownstreamFault),
}

/// Which timeout clock aborted a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClock {
    /// The per-call deadline (optionally reset by progress).
    Call,
    /// The absolute ceiling.
    Total,
}

impl TimeoutClock {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for TimeoutClock {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
