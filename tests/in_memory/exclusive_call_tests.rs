//! Admission control on process servers.

use std::time::Duration;

use rstest::rstest;
use serde_json::{Value, json};
use switchyard::config::ExclusiveCallPolicy;
use switchyard::tool_registry::{
    adapters::{ScriptStep, ScriptedTransportAdapter},
    domain::{ServerConfigBody, ServerConfigDocument, TimeoutClock, TransportKind},
    services::DispatchError,
};
use tokio::time::Instant;

use super::helpers::{TestDispatcher, register, stack_with};

fn hundred_ms_tool() -> ScriptedTransportAdapter {
    ScriptedTransportAdapter::new(TransportKind::Stdio).with_script(
        "work",
        vec![ScriptStep::Complete(Duration::from_millis(100), json!({"content": []}))],
    )
}

async fn timed(
    dispatcher: &TestDispatcher,
    started: Instant,
) -> (Result<(), DispatchError>, Duration) {
    let result = dispatcher.dispatch("worker", "work", Value::Null).await;
    (result.map(drop), started.elapsed())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn queued_calls_run_one_at_a_time_in_arrival_order() {
    let stack = stack_with(hundred_ms_tool(), ExclusiveCallPolicy::Queue);
    register(&stack.service, "worker", Value::Null).await;
    let started = Instant::now();

    let (first, second, third) = tokio::join!(
        timed(&stack.dispatcher, started),
        timed(&stack.dispatcher, started),
        timed(&stack.dispatcher, started),
    );

    let finished: Vec<_> = [first, second, third]
        .into_iter()
        .map(|(result, elapsed)| {
            assert!(result.is_ok());
            elapsed
        })
        .collect();
    assert_eq!(
        finished,
        [
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
        ]
    );
    assert_eq!(stack.adapter.stats().max_concurrent_calls, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reject_policy_fails_second_call_fast() {
    let stack = stack_with(hundred_ms_tool(), ExclusiveCallPolicy::Reject);
    register(&stack.service, "worker", Value::Null).await;
    let started = Instant::now();

    let (first, second) = tokio::join!(
        timed(&stack.dispatcher, started),
        timed(&stack.dispatcher, started),
    );

    assert!(first.0.is_ok());
    assert!(matches!(second.0, Err(DispatchError::Busy(_))));
    assert_eq!(second.1, Duration::ZERO);
    assert_eq!(stack.adapter.stats().calls, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn queue_wait_counts_against_the_call_deadline() {
    let stack = stack_with(hundred_ms_tool(), ExclusiveCallPolicy::Queue);
    register(&stack.service, "worker", json!({"timeout": 150})).await;
    let started = Instant::now();

    let (first, second) = tokio::join!(
        timed(&stack.dispatcher, started),
        timed(&stack.dispatcher, started),
    );

    assert!(first.0.is_ok());
    assert!(matches!(
        second.0,
        Err(DispatchError::TimedOut {
            clock: TimeoutClock::Call
        })
    ));
    assert_eq!(second.1, Duration::from_millis(150));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn multiplexed_servers_overlap_calls() {
    let adapter = ScriptedTransportAdapter::new(TransportKind::Sse).with_script(
        "work",
        vec![ScriptStep::Complete(Duration::from_millis(100), json!({"content": []}))],
    );
    let stack = stack_with(adapter, ExclusiveCallPolicy::Reject);
    let body: ServerConfigBody = serde_json::from_value(json!({"url": "http://localhost:9/sse"}))
        .expect("body should deserialize");
    stack
        .service
        .create_server(ServerConfigDocument::new("worker", body))
        .await
        .expect("registration should succeed");
    let started = Instant::now();

    let (first, second) = tokio::join!(
        timed(&stack.dispatcher, started),
        timed(&stack.dispatcher, started),
    );

    assert!(first.0.is_ok() && second.0.is_ok());
    assert_eq!(second.1, Duration::from_millis(100));
    assert_eq!(stack.adapter.stats().max_concurrent_calls, 2);
}
