//! Lookup from transport kind to the adapter that opens it.

use super::{
    ClientInfo, SseTransportAdapter, StdioTransportAdapter, StreamableHttpTransportAdapter,
};
use crate::config::DispatchSettings;
use crate::tool_registry::{domain::TransportKind, ports::TransportAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Transport adapters keyed by the kind they serve.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    adapters: HashMap<TransportKind, Arc<dyn TransportAdapter>>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the process, SSE and streamable HTTP adapters.
    #[must_use]
    pub fn standard(settings: &DispatchSettings) -> Self {
        let client: ClientInfo = settings.client_info();
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "HTTP client configuration rejected, using defaults");
                reqwest::Client::new()
            });
        Self::new()
            .with_adapter(Arc::new(StdioTransportAdapter::new(
                client.clone(),
                settings.shutdown_grace(),
            )))
            .with_adapter(Arc::new(SseTransportAdapter::with_http_client(
                client.clone(),
                http.clone(),
            )))
            .with_adapter(Arc::new(StreamableHttpTransportAdapter::with_http_client(
                client,
                http,
                settings.shutdown_grace(),
            )))
    }

    /// Registers `adapter` under its own kind, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Returns the adapter for `kind`.
    #[must_use]
    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn TransportAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().map(|kind| kind.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_registry::adapters::ScriptedTransportAdapter;

    #[test]
    fn standard_registry_serves_every_kind() {
        let registry = TransportRegistry::standard(&DispatchSettings::default());

        for kind in [
            TransportKind::Stdio,
            TransportKind::Sse,
            TransportKind::StreamableHttp,
        ] {
            let adapter = registry.get(kind).expect("adapter should be registered");
            assert_eq!(adapter.kind(), kind);
        }
    }

    #[test]
    fn later_adapter_replaces_earlier_one() {
        let scripted = Arc::new(ScriptedTransportAdapter::new(TransportKind::Sse));
        let registry = TransportRegistry::standard(&DispatchSettings::default())
            .with_adapter(scripted.clone());

        let adapter = registry.get(TransportKind::Sse).expect("adapter should be registered");

        assert!(Arc::ptr_eq(
            &adapter,
            &(scripted as Arc<dyn TransportAdapter>)
        ));
    }
}
