//! Switchyard: multi-transport MCP tool dispatch.
//!
//! This crate keeps a validated, persisted set of MCP server descriptors and
//! routes tool calls to those servers over local processes, legacy
//! HTTP+SSE, or streamable HTTP. Connections are pooled per server and every
//! call runs under a per-call deadline, optionally reset by progress, and an
//! absolute ceiling.
//!
//! # Architecture
//!
//! Switchyard follows hexagonal architecture principles:
//!
//! - **Domain**: Pure configuration and invocation types
//! - **Ports**: Abstract trait interfaces for persistence and transports
//! - **Adapters**: Repositories and transport implementations
//! - **Services**: Store, connection pool, deadlines and dispatch
//!
//! # Modules
//!
//! - [`tool_registry`]: Descriptors, transports and dispatch
//! - [`config`]: Dispatch settings
//! - [`telemetry`]: Tracing subscriber installation

pub mod config;
pub mod telemetry;
pub mod tool_registry;
