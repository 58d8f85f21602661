//! Call and total deadlines for one invocation.

use crate::tool_registry::{
    domain::{
        DownstreamFault, InvocationEvent, InvocationOptions, TimeoutClock, ToolCallResult,
        TransportKind,
    },
    ports::{InvocationStream, TransportError},
};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

/// Why a governed invocation produced no result.
#[derive(Debug, Clone, Error)]
pub enum GovernorError {
    /// A deadline fired first; the invocation was abandoned.
    #[error("tool call timed out ({clock} deadline)")]
    TimedOut {
        /// The deadline that fired.
        clock: TimeoutClock,
    },
    /// The transport failed or ended without a result.
    #[error(transparent)]
    Transport(TransportError),
    /// The server answered with an error.
    #[error("downstream error: {0}")]
    Downstream(DownstreamFault),
}

/// The two deadlines supervising one invocation.
///
/// Both start when the deadlines are created. The call deadline restarts on
/// progress when the options ask for it; the total deadline never moves.
#[derive(Debug, Clone, Copy)]
pub struct InvocationDeadlines {
    call_timeout: Duration,
    reset_on_progress: bool,
    call_deadline: Instant,
    total_deadline: Option<Instant>,
}

impl InvocationDeadlines {
    /// Starts both clocks now.
    #[must_use]
    pub fn start(options: &InvocationOptions) -> Self {
        let started = Instant::now();
        Self {
            call_timeout: options.call_timeout(),
            reset_on_progress: options.reset_timeout_on_progress(),
            call_deadline: started + options.call_timeout(),
            total_deadline: options.max_total_timeout().map(|ceiling| started + ceiling),
        }
    }

    fn on_progress(&mut self) {
        if self.reset_on_progress {
            self.call_deadline = Instant::now() + self.call_timeout;
        }
    }

    fn next_expiry(&self) -> (Instant, TimeoutClock) {
        match self.total_deadline {
            Some(total) if total <= self.call_deadline => (total, TimeoutClock::Total),
            _ => (self.call_deadline, TimeoutClock::Call),
        }
    }

    async fn expired(&self) -> TimeoutClock {
        let (deadline, clock) = self.next_expiry();
        sleep_until(deadline).await;
        clock
    }

    /// Runs `work` until it finishes or the earlier deadline fires.
    ///
    /// # Errors
    ///
    /// Returns the clock that fired when `work` did not finish in time.
    pub async fn bound<F>(&self, work: F) -> Result<F::Output, TimeoutClock>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            output = work => Ok(output),
            clock = self.expired() => Err(clock),
        }
    }

    /// Drives `events` to a terminal event under both deadlines.
    ///
    /// On timeout the stream is dropped, which cancels the call in its
    /// transport; a result arriving later is never observed.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError`] for timeouts, transport failures, a stream
    /// that ends without a result, and downstream errors.
    pub async fn supervise(
        mut self,
        kind: TransportKind,
        mut events: InvocationStream,
    ) -> Result<ToolCallResult, GovernorError> {
        loop {
            tokio::select! {
                biased;
                next = events.next() => match next {
                    Some(Ok(InvocationEvent::Progress(signal))) => {
                        trace!(progress = ?signal.progress(), "progress received");
                        self.on_progress();
                    }
                    Some(Ok(InvocationEvent::Completed(result))) => return Ok(result),
                    Some(Ok(InvocationEvent::Rejected(fault))) => {
                        return Err(GovernorError::Downstream(fault));
                    }
                    Some(Err(err)) => return Err(GovernorError::Transport(err)),
                    None => return Err(GovernorError::Transport(TransportError::closed(kind))),
                },
                clock = self.expired() => {
                    drop(events);
                    debug!(%clock, "invocation abandoned");
                    return Err(GovernorError::TimedOut { clock });
                }
            }
        }
    }
}
