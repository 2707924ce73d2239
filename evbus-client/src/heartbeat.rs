//! Liveness pings while authenticated
//!
//! The monitor owns the heartbeat task and the ping/pong bookkeeping. The
//! task itself is a plain loop around a tick callback supplied by the bus:
//! sleep one interval, tick, repeat until the tick says stop. The callback
//! sends the ping and decides whether the session is still the one the task
//! was started for.
//!
//! Pongs are recorded for observability. When a heartbeat timeout is
//! configured, a ping left unanswered for longer than the timeout marks the
//! transport as dead.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What the tick callback wants the loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// Heartbeat task handle plus ping/pong timestamps
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    task: Option<JoinHandle<()>>,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    // oldest ping not yet followed by a pong
    unanswered_since: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the loop, replacing any previous one
    pub fn start<F, Fut>(&mut self, interval: Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        self.stop();
        self.task = Some(tokio::spawn(run(interval, tick)));
    }

    /// Abort the loop and forget the timestamps
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.last_ping = None;
        self.last_pong = None;
        self.unanswered_since = None;
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn record_ping(&mut self, at: Instant) {
        self.last_ping = Some(at);
        self.unanswered_since.get_or_insert(at);
    }

    pub fn record_pong(&mut self, at: Instant) {
        self.last_pong = Some(at);
        self.unanswered_since = None;
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// True when a ping has gone unanswered for at least `timeout`
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        self.unanswered_since
            .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }
}

async fn run<F, Fut>(interval: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Tick>,
{
    loop {
        tokio::time::sleep(interval).await;
        if tick().await == Tick::Stop {
            break;
        }
    }
}
