//! Scripted in-memory transport adapter.
//!
//! This adapter models connections and tool calls without spawning
//! processes or opening sockets. Each tool answers with a timeline of
//! events, which makes timeout and lifecycle behaviour deterministic under
//! a paused Tokio clock.

use crate::tool_registry::{
    domain::{
        ConnectionId, DownstreamFault, InvocationEvent, McpToolDefinition, ProgressSignal,
        ServerDescriptor, ToolCallRequest, ToolCallResult, TransportKind,
    },
    ports::{
        CallConcurrency, InvocationStream, ListToolsError, TransportAdapter, TransportConnection,
        TransportError, TransportFailure, TransportResult,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One step of a scripted tool call.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a progress signal after the delay.
    Progress(Duration),
    /// Complete with the payload after the delay.
    Complete(Duration, Value),
    /// Answer with a downstream fault after the delay.
    Reject(Duration, DownstreamFault),
    /// Fail the transport after the delay.
    Fail(Duration, TransportFailure),
    /// Never answer.
    Hang,
}

impl ScriptStep {
    /// Emits `count` progress signals spaced by `interval`.
    #[must_use]
    pub fn progress_every(interval: Duration, count: usize) -> Vec<Self> {
        vec![Self::Progress(interval); count]
    }
}

/// Counters observed by the scripted adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptStats {
    /// Successful `open` calls.
    pub opens: usize,
    /// `close` calls.
    pub closes: usize,
    /// Calls started.
    pub calls: usize,
    /// Calls dropped before their terminal event.
    pub abandoned_calls: usize,
    /// Highest number of calls observed in flight at once.
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, Vec<ScriptStep>>,
    tools: Vec<McpToolDefinition>,
    open_failures: VecDeque<TransportFailure>,
    open_delay: Duration,
    in_flight: usize,
    stats: ScriptStats,
}

/// Transport adapter whose connections replay scripted timelines.
#[derive(Debug, Clone)]
pub struct ScriptedTransportAdapter {
    kind: TransportKind,
    concurrency: CallConcurrency,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransportAdapter {
    /// Creates an adapter for `kind`; process transports are exclusive.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        let concurrency = if kind == TransportKind::Stdio {
            CallConcurrency::Exclusive
        } else {
            CallConcurrency::Multiplexed
        };
        Self {
            kind,
            concurrency,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        lock(&self.state)
    }

    /// Sets the timeline replayed for every call of `tool`.
    #[must_use]
    pub fn with_script(self, tool: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.set_script(tool, steps);
        self
    }

    /// Replaces the timeline of `tool` on an adapter already in use.
    pub fn set_script(&self, tool: impl Into<String>, steps: Vec<ScriptStep>) {
        self.state().scripts.insert(tool.into(), steps);
    }

    /// Sets the tool catalog returned by `tools/list`.
    #[must_use]
    pub fn with_tools(self, tools: Vec<McpToolDefinition>) -> Self {
        self.state().tools = tools;
        self
    }

    /// Delays every `open` by `delay`.
    #[must_use]
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.state().open_delay = delay;
        self
    }

    /// Makes the next `open` fail with `failure`.
    pub fn fail_next_open(&self, failure: TransportFailure) {
        self.state().open_failures.push_back(failure);
    }

    /// Returns the counters observed so far.
    #[must_use]
    pub fn stats(&self) -> ScriptStats {
        self.state().stats
    }
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TransportAdapter for ScriptedTransportAdapter {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(
        &self,
        _descriptor: &ServerDescriptor,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        let delay = self.state().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.state().open_failures.pop_front();
        if let Some(cause) = failure {
            return Err(TransportError::new(self.kind, cause));
        }
        self.state().stats.opens += 1;
        Ok(Arc::new(ScriptedConnection {
            id: ConnectionId::new(),
            kind: self.kind,
            concurrency: self.concurrency,
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedConnection {
    id: ConnectionId,
    kind: TransportKind,
    concurrency: CallConcurrency,
    state: Arc<Mutex<ScriptState>>,
}

/// Tracks one in-flight call; dropping it before completion counts as
/// abandonment.
struct CallTracker {
    state: Arc<Mutex<ScriptState>>,
    finished: bool,
}

impl CallTracker {
    fn start(state: Arc<Mutex<ScriptState>>) -> Self {
        {
            let mut guard = lock(&state);
            guard.in_flight += 1;
            guard.stats.calls += 1;
            guard.stats.max_concurrent_calls =
                guard.stats.max_concurrent_calls.max(guard.in_flight);
        }
        Self {
            state,
            finished: false,
        }
    }
}

impl Drop for CallTracker {
    fn drop(&mut self) {
        let mut guard = lock(&self.state);
        guard.in_flight = guard.in_flight.saturating_sub(1);
        if !self.finished {
            guard.stats.abandoned_calls += 1;
        }
    }
}

#[async_trait]
impl TransportConnection for ScriptedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn concurrency(&self) -> CallConcurrency {
        self.concurrency
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, ListToolsError> {
        Ok(lock(&self.state).tools.clone())
    }

    fn invoke(&self, request: ToolCallRequest) -> InvocationStream {
        let steps = lock(&self.state)
            .scripts
            .get(request.tool_name())
            .cloned()
            .unwrap_or_else(|| vec![ScriptStep::Complete(Duration::ZERO, json!({"content": []}))]);
        let kind = self.kind;
        let started = CallTracker::start(Arc::clone(&self.state));

        async_stream::stream! {
            let mut tracker = started;
            for step in steps {
                match step {
                    ScriptStep::Progress(delay) => {
                        tokio::time::sleep(delay).await;
                        yield Ok(InvocationEvent::Progress(ProgressSignal::now()));
                    }
                    ScriptStep::Complete(delay, payload) => {
                        tokio::time::sleep(delay).await;
                        tracker.finished = true;
                        yield Ok(InvocationEvent::Completed(ToolCallResult::new(payload)));
                        break;
                    }
                    ScriptStep::Reject(delay, fault) => {
                        tokio::time::sleep(delay).await;
                        tracker.finished = true;
                        yield Ok(InvocationEvent::Rejected(fault));
                        break;
                    }
                    ScriptStep::Fail(delay, failure) => {
                        tokio::time::sleep(delay).await;
                        tracker.finished = true;
                        yield Err(TransportError::new(kind, failure));
                        break;
                    }
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        }
        .boxed()
    }

    async fn close(&self) {
        lock(&self.state).stats.closes += 1;
    }
}
