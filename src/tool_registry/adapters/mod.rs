//! Adapter implementations for descriptor persistence and MCP transports.

pub mod file;
pub mod memory;
pub mod sse_codec;

mod http;
mod jsonrpc;
mod registry;
mod scripted;
mod sse;
mod stdio;
mod streamable_http;

pub use jsonrpc::ClientInfo;
pub use registry::TransportRegistry;
pub use scripted::{ScriptStats, ScriptStep, ScriptedTransportAdapter};
pub use sse::SseTransportAdapter;
pub use stdio::StdioTransportAdapter;
pub use streamable_http::StreamableHttpTransportAdapter;
