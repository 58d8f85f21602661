//! Deadline behaviour observed through the dispatcher.

use std::time::Duration;

use rstest::rstest;
use serde_json::{Value, json};
use switchyard::config::ExclusiveCallPolicy;
use switchyard::tool_registry::{
    adapters::{ScriptStep, ScriptedTransportAdapter},
    domain::{TimeoutClock, TransportKind},
    services::DispatchError,
};
use tokio::time::Instant;

use super::helpers::{register, stack_with};

fn scripted(tool: &str, steps: Vec<ScriptStep>) -> ScriptedTransportAdapter {
    ScriptedTransportAdapter::new(TransportKind::Stdio).with_script(tool, steps)
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn progress_resets_call_deadline_until_final_result() {
    let mut steps = ScriptStep::progress_every(Duration::from_millis(500), 10);
    steps.push(ScriptStep::Complete(
        Duration::from_millis(100),
        json!({"content": [{"type": "text", "text": "indexed"}]}),
    ));
    let stack = stack_with(scripted("index", steps), ExclusiveCallPolicy::Queue);
    register(
        &stack.service,
        "indexer",
        json!({"timeout": 1000, "resetTimeoutOnProgress": true}),
    )
    .await;

    let started = Instant::now();
    let result = stack.dispatcher.dispatch("indexer", "index", Value::Null).await;

    let payload = result.expect("long call should succeed");
    assert_eq!(payload.payload()["content"][0]["text"], "indexed");
    assert_eq!(started.elapsed(), Duration::from_millis(5_100));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn total_deadline_fires_despite_progress() {
    let steps = ScriptStep::progress_every(Duration::from_millis(100), 100);
    let stack = stack_with(scripted("crawl", steps), ExclusiveCallPolicy::Queue);
    register(
        &stack.service,
        "crawler",
        json!({"timeout": 1000, "resetTimeoutOnProgress": true, "maxTotalTimeout": 2000}),
    )
    .await;

    let started = Instant::now();
    let result = stack.dispatcher.dispatch("crawler", "crawl", Value::Null).await;

    assert!(matches!(
        result,
        Err(DispatchError::TimedOut {
            clock: TimeoutClock::Total
        })
    ));
    assert_eq!(started.elapsed(), Duration::from_millis(2_000));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn result_after_timeout_is_discarded() {
    let adapter = scripted(
        "slow",
        vec![ScriptStep::Complete(Duration::from_millis(1_500), json!({"content": []}))],
    );
    let stack = stack_with(adapter, ExclusiveCallPolicy::Queue);
    register(&stack.service, "laggard", json!({"timeout": 1000})).await;

    let timed_out = stack.dispatcher.dispatch("laggard", "slow", Value::Null).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    let next = stack.dispatcher.dispatch("laggard", "other", Value::Null).await;

    assert!(matches!(
        timed_out,
        Err(DispatchError::TimedOut {
            clock: TimeoutClock::Call
        })
    ));
    assert!(next.is_ok());
    let stats = stack.adapter.stats();
    assert_eq!(stats.abandoned_calls, 1);
    assert_eq!(stats.opens, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn call_deadline_without_reset_ignores_progress() {
    let steps = ScriptStep::progress_every(Duration::from_millis(200), 20);
    let stack = stack_with(scripted("poll", steps), ExclusiveCallPolicy::Queue);
    register(&stack.service, "poller", json!({"timeout": 1000})).await;

    let started = Instant::now();
    let result = stack.dispatcher.dispatch("poller", "poll", Value::Null).await;

    assert!(matches!(
        result,
        Err(DispatchError::TimedOut {
            clock: TimeoutClock::Call
        })
    ));
    assert_eq!(started.elapsed(), Duration::from_millis(1_000));
}
