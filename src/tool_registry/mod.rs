//! MCP server registry and multi-transport tool dispatch.
//!
//! The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]: descriptors, transports, invocation options
//!   and connection states
//! - Port contracts in [`ports`]: descriptor persistence and transports
//! - Adapter implementations in [`adapters`]: repositories plus the process,
//!   SSE and streamable HTTP transports
//! - Orchestration services in [`services`]: store, pool, deadlines,
//!   dispatcher and the registry facade

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
