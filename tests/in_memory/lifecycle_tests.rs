//! Connection lifecycle as seen through the registry service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::Value;
use switchyard::config::{DispatchSettings, ExclusiveCallPolicy};
use switchyard::tool_registry::{
    adapters::{
        ScriptedTransportAdapter, TransportRegistry, memory::InMemoryServerDescriptorRepository,
    },
    domain::{ConnectionState, McpServerName, ServerDescriptor, TransportKind},
    ports::{ServerDescriptorRepository, ServerDescriptorRepositoryResult, TransportFailure},
    services::{
        ConnectionPool, DescriptorStore, DispatchError, PoolSettings, ToolRegistryService,
    },
};

use super::helpers::{Stack, build_service, register, stack, stdio_document};

#[rstest]
#[tokio::test]
async fn disabling_a_server_closes_its_connection_once(stack: Stack) {
    register(&stack.service, "alpha", Value::Null).await;
    stack
        .dispatcher
        .dispatch("alpha", "echo", Value::Null)
        .await
        .expect("dispatch should succeed");

    stack
        .service
        .toggle_server("alpha", false)
        .await
        .expect("disable should succeed");
    let after_disable = stack.dispatcher.dispatch("alpha", "echo", Value::Null).await;
    stack.service.shutdown().await;

    assert!(matches!(after_disable, Err(DispatchError::NotFound(_))));
    assert_eq!(stack.adapter.stats().closes, 1);
}

#[rstest]
#[tokio::test]
async fn re_enabling_opens_a_fresh_connection(stack: Stack) {
    register(&stack.service, "alpha", Value::Null).await;
    stack
        .dispatcher
        .dispatch("alpha", "echo", Value::Null)
        .await
        .expect("dispatch should succeed");

    for enabled in [false, true] {
        stack
            .service
            .toggle_server("alpha", enabled)
            .await
            .expect("toggle should succeed");
    }
    stack
        .dispatcher
        .dispatch("alpha", "echo", Value::Null)
        .await
        .expect("dispatch should succeed");

    let stats = stack.adapter.stats();
    assert_eq!((stats.opens, stats.closes), (2, 1));
    let status = stack.service.get_server("alpha").expect("server exists");
    assert_eq!(status.connection.state(), ConnectionState::Ready);
}

#[rstest]
#[tokio::test]
async fn missing_binary_never_becomes_ready() {
    let settings = DispatchSettings::default();
    let service = build_service(TransportRegistry::standard(&settings), ExclusiveCallPolicy::Queue);
    service
        .create_server(stdio_document(
            "ghost",
            "/nonexistent/switchyard-missing-server",
            Value::Null,
        ))
        .await
        .expect("registration should succeed");

    let result = service.dispatcher().dispatch("ghost", "echo", Value::Null).await;

    assert!(matches!(
        result,
        Err(DispatchError::Transport(ref err))
            if matches!(err.failure(), TransportFailure::Spawn { .. })
    ));
    let status = service.get_server("ghost").expect("server exists");
    assert_eq!(status.connection.state(), ConnectionState::Closed);
    assert!(status.connection.connection_id().is_none());
    assert!(status.connection.last_error().is_some());
}

#[cfg(unix)]
#[rstest]
#[tokio::test]
async fn process_that_is_not_an_mcp_server_fails_the_handshake() {
    let settings = DispatchSettings::default();
    let service = build_service(TransportRegistry::standard(&settings), ExclusiveCallPolicy::Queue);
    service
        .create_server(stdio_document("echoer", "cat", Value::Null))
        .await
        .expect("registration should succeed");

    let result = service.dispatcher().dispatch("echoer", "echo", Value::Null).await;

    assert!(matches!(
        result,
        Err(DispatchError::Transport(ref err))
            if matches!(err.failure(), TransportFailure::Handshake(_))
    ));
    let status = service.get_server("echoer").expect("server exists");
    assert_eq!(status.connection.state(), ConnectionState::Closed);
}

/// Repository whose deletes take a while to be acknowledged.
struct SlowDeleteRepository {
    inner: InMemoryServerDescriptorRepository,
    delay: Duration,
}

#[async_trait]
impl ServerDescriptorRepository for SlowDeleteRepository {
    async fn load_all(&self) -> ServerDescriptorRepositoryResult<Vec<ServerDescriptor>> {
        self.inner.load_all().await
    }

    async fn save(&self, descriptor: &ServerDescriptor) -> ServerDescriptorRepositoryResult<()> {
        self.inner.save(descriptor).await
    }

    async fn delete(&self, name: &McpServerName) -> ServerDescriptorRepositoryResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(name).await
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn call_during_deletion_leaves_no_connection_behind() {
    let adapter = ScriptedTransportAdapter::new(TransportKind::Stdio);
    let clock = Arc::new(DefaultClock);
    let store = Arc::new(DescriptorStore::new(Arc::new(SlowDeleteRepository {
        inner: InMemoryServerDescriptorRepository::new(),
        delay: Duration::from_millis(100),
    })));
    let pool = Arc::new(ConnectionPool::new(
        TransportRegistry::new().with_adapter(Arc::new(adapter.clone())),
        PoolSettings {
            connect_timeout: Duration::from_secs(5),
            exclusive_call_policy: ExclusiveCallPolicy::Queue,
        },
        Arc::clone(&clock),
    ));
    let service = ToolRegistryService::new(store, Arc::clone(&pool), clock);
    service
        .create_server(stdio_document("alpha", "mcp-server", Value::Null))
        .await
        .expect("registration should succeed");
    let dispatcher = service.dispatcher();

    let (deleted, _during_delete) = tokio::join!(service.delete_server("alpha"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.dispatch("alpha", "echo", Value::Null).await
    });

    deleted.expect("deletion should succeed");
    let stats = adapter.stats();
    assert_eq!(stats.opens, stats.closes);
    assert!(service.list_servers().is_empty());
    let name = McpServerName::new("alpha").expect("valid name");
    assert_ne!(pool.snapshot(&name).state(), ConnectionState::Ready);
}
