//! Descriptor validation and persistence failure handling.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::DefaultClock;
use mockall::mock;
use rstest::rstest;
use serde_json::{Value, json};
use switchyard::tool_registry::{
    domain::{
        McpServerName, McpTransport, ServerConfigBody, ServerConfigDocument, ServerDescriptor,
        ToolOverride, ToolRegistryDomainError,
    },
    ports::{
        ServerDescriptorRepository, ServerDescriptorRepositoryError,
        ServerDescriptorRepositoryResult,
    },
    services::{DescriptorStore, DescriptorStoreError, DispatchError},
};

use super::helpers::{Stack, stack};

mock! {
    pub Repository {}

    #[async_trait]
    impl ServerDescriptorRepository for Repository {
        async fn load_all(&self) -> ServerDescriptorRepositoryResult<Vec<ServerDescriptor>>;
        async fn save(&self, descriptor: &ServerDescriptor) -> ServerDescriptorRepositoryResult<()>;
        async fn delete(&self, name: &McpServerName) -> ServerDescriptorRepositoryResult<()>;
    }
}

fn descriptor(name: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        McpServerName::new(name).expect("valid name"),
        McpTransport::stdio("mcp-server").expect("valid transport"),
        &DefaultClock,
    )
}

fn disk_full() -> ServerDescriptorRepositoryError {
    ServerDescriptorRepositoryError::persistence(std::io::Error::other("disk full"))
}

#[rstest]
#[tokio::test]
async fn rejected_write_leaves_index_unchanged() {
    let mut repository = MockRepository::new();
    repository.expect_save().times(1).returning(|_| Err(disk_full()));
    let store = DescriptorStore::new(Arc::new(repository));

    let result = store.upsert(descriptor("alpha")).await;

    assert!(matches!(result, Err(DescriptorStoreError::Repository(_))));
    assert!(store.list().is_empty());
}

#[rstest]
#[tokio::test]
async fn rejected_delete_keeps_descriptor() {
    let mut repository = MockRepository::new();
    repository.expect_save().returning(|_| Ok(()));
    repository.expect_delete().times(1).returning(|_| Err(disk_full()));
    let store = DescriptorStore::new(Arc::new(repository));
    let stored = store
        .upsert(descriptor("alpha"))
        .await
        .expect("upsert should succeed");

    let result = store.remove(stored.name()).await;

    assert!(matches!(result, Err(DescriptorStoreError::Repository(_))));
    assert_eq!(store.get(stored.name()).expect("still indexed"), stored);
}

#[rstest]
#[tokio::test]
async fn invalid_descriptor_never_reaches_the_repository() {
    let mut repository = MockRepository::new();
    repository.expect_save().never();
    let store = DescriptorStore::new(Arc::new(repository));
    let invalid =
        descriptor("alpha").with_tools([(" ".to_owned(), ToolOverride::new(false, None))]);

    let result = store.upsert(invalid).await;

    assert!(matches!(result, Err(DescriptorStoreError::Validation(_))));
}

#[rstest]
#[tokio::test]
async fn failed_load_keeps_previous_index() {
    let mut repository = MockRepository::new();
    repository.expect_save().returning(|_| Ok(()));
    repository
        .expect_load_all()
        .times(1)
        .returning(|| Err(disk_full()));
    let store = DescriptorStore::new(Arc::new(repository));
    store
        .upsert(descriptor("alpha"))
        .await
        .expect("upsert should succeed");

    let result = store.load().await;

    assert!(result.is_err());
    assert_eq!(store.list().len(), 1);
}

#[rstest]
#[case::both_groups(
    json!({"command": "mcp-server", "url": "http://localhost:8080/sse"}),
    "conflict"
)]
#[case::neither_group(json!({}), "command")]
#[case::ceiling_below_timeout(
    json!({"command": "mcp-server", "options": {"timeout": 5000, "maxTotalTimeout": 1000}}),
    "ceiling"
)]
#[case::unknown_type(json!({"type": "websocket", "url": "ws://localhost"}), "type")]
#[tokio::test]
async fn invalid_documents_are_rejected(
    stack: Stack,
    #[case] config: Value,
    #[case] expected: &str,
) {
    let body: ServerConfigBody = serde_json::from_value(config).expect("body should deserialize");

    let result = stack
        .service
        .create_server(ServerConfigDocument::new("alpha", body))
        .await;

    let error = match result {
        Err(DispatchError::Validation(error)) => error,
        other => panic!("expected a validation error, got {other:?}"),
    };
    let actual = match error {
        ToolRegistryDomainError::ConflictingTransportFields { .. } => "conflict",
        ToolRegistryDomainError::EmptyStdioCommand => "command",
        ToolRegistryDomainError::TotalTimeoutBelowCallTimeout { .. } => "ceiling",
        ToolRegistryDomainError::UnknownTransportType(_) => "type",
        other => panic!("unexpected validation error: {other}"),
    };
    assert_eq!(actual, expected);
    assert!(stack.service.list_servers().is_empty());
}

#[rstest]
#[tokio::test]
async fn stored_document_round_trips(stack: Stack) {
    let body: ServerConfigBody = serde_json::from_value(json!({
        "type": "streamable-http",
        "url": "https://tools.example.com/mcp",
        "headers": {"Authorization": "Bearer token"},
        "options": {"timeout": 5000, "resetTimeoutOnProgress": true},
        "tools": {"delete_all": {"enabled": false}}
    }))
    .expect("body should deserialize");

    let created = stack
        .service
        .create_server(ServerConfigDocument::new("remote", body))
        .await
        .expect("create should succeed");
    let status = stack.service.get_server("remote").expect("server exists");

    assert_eq!(status.descriptor, created);
    let rendered = serde_json::to_value(status.document()).expect("document should serialize");
    assert_eq!(rendered["config"]["type"], "streamable-http");
    assert_eq!(rendered["config"]["options"]["timeout"], 5000);
    assert_eq!(rendered["config"]["tools"]["delete_all"]["enabled"], false);
}
