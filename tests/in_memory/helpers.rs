//! Shared fixtures for in-memory dispatch tests.

use std::sync::Arc;
use std::time::Duration;

use mockable::DefaultClock;
use rstest::fixture;
use serde_json::{Value, json};
use switchyard::config::ExclusiveCallPolicy;
use switchyard::tool_registry::{
    adapters::{
        ScriptedTransportAdapter, TransportRegistry, memory::InMemoryServerDescriptorRepository,
    },
    domain::{ServerConfigBody, ServerConfigDocument, TransportKind},
    services::{ConnectionPool, DescriptorStore, Dispatcher, PoolSettings, ToolRegistryService},
};

/// Registry service over the in-memory repository.
pub type TestService = ToolRegistryService<InMemoryServerDescriptorRepository, DefaultClock>;

/// Dispatcher over the in-memory repository.
pub type TestDispatcher = Dispatcher<InMemoryServerDescriptorRepository, DefaultClock>;

/// A registry service and dispatcher wired to one transport registry.
pub struct Stack {
    pub adapter: ScriptedTransportAdapter,
    pub service: TestService,
    pub dispatcher: TestDispatcher,
}

/// Wires a stack around `transports`.
pub fn build_service(transports: TransportRegistry, policy: ExclusiveCallPolicy) -> TestService {
    let clock = Arc::new(DefaultClock);
    let store = Arc::new(DescriptorStore::new(Arc::new(
        InMemoryServerDescriptorRepository::new(),
    )));
    let pool = Arc::new(ConnectionPool::new(
        transports,
        PoolSettings {
            connect_timeout: Duration::from_secs(5),
            exclusive_call_policy: policy,
        },
        Arc::clone(&clock),
    ));
    ToolRegistryService::new(store, pool, clock)
}

/// Wires a stack whose process transport replays `adapter`'s scripts.
pub fn stack_with(adapter: ScriptedTransportAdapter, policy: ExclusiveCallPolicy) -> Stack {
    let service = build_service(
        TransportRegistry::new().with_adapter(Arc::new(adapter.clone())),
        policy,
    );
    let dispatcher = service.dispatcher();
    Stack {
        adapter,
        service,
        dispatcher,
    }
}

/// Provides a stack with an unscripted process transport.
#[fixture]
pub fn stack() -> Stack {
    stack_with(
        ScriptedTransportAdapter::new(TransportKind::Stdio),
        ExclusiveCallPolicy::Queue,
    )
}

/// Builds a process server document with the given `options` object.
pub fn stdio_document(name: &str, command: &str, options: Value) -> ServerConfigDocument {
    let mut config = json!({"command": command});
    if !options.is_null() {
        config["options"] = options;
    }
    let body: ServerConfigBody =
        serde_json::from_value(config).expect("document body should deserialize");
    ServerConfigDocument::new(name, body)
}

/// Registers a process server named `name`.
pub async fn register(service: &TestService, name: &str, options: Value) {
    service
        .create_server(stdio_document(name, "mcp-server", options))
        .await
        .expect("registration should succeed");
}
