//! # Worker: one subscription handle, one consumption loop.
//!
//! ```text
//! loop {
//!   ├─► receive(cancel)
//!   │     ├─ Cancelled        ─► exit (Completed)
//!   │     ├─ Closed           ─► exit (Aborted)
//!   │     ├─ Failed{held}     ─► nack(held) if any, warn, continue
//!   │     └─ Message
//!   ├─► mapper.map(delivery)
//!   ├─► sink.send(event)
//!   │     ├─ Ok  ─► ack(id)
//!   │     └─ Err ─► nack(id)
//! }
//! Draining: handle.close() (errors logged) ─► Stopped
//! ```
//!
//! Cancellation is only observed at `receive`. A message taken off the
//! handle is always mapped, sent and resolved before the worker looks at the
//! signal again.

use std::sync::Arc;

use tokio::sync::watch;

use pulsarbeat_api::util::now_ms;
use pulsarbeat_api::{CancelSignal, MessageId, Received, Sink, SubscriptionHandle};

use crate::mapper::EventMapper;

/// Lifecycle of a worker. Transitions only go forward:
/// `Running → Draining → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// How a worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Stopped by the cancel signal.
    Completed,
    /// The handle failed terminally, or the worker task died.
    Aborted { reason: String },
}

impl WorkerOutcome {
    pub fn is_abnormal(&self) -> bool {
        matches!(self, WorkerOutcome::Aborted { .. })
    }
}

/// Per-worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub receive_errors: u64,
    /// ack/nack calls the handle refused.
    pub resolve_errors: u64,
}

/// Final report of one worker, collected by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub name: String,
    pub state: WorkerState,
    pub outcome: WorkerOutcome,
    pub stats: WorkerStats,
    /// `false` when the handle arrived after stop and was closed without running.
    pub started: bool,
}

/// Consumption loop bound to one subscription handle.
pub struct Worker {
    name: String,
    handle: Box<dyn SubscriptionHandle>,
    sink: Arc<dyn Sink>,
    mapper: Arc<dyn EventMapper>,
    signal: CancelSignal,
    state_tx: watch::Sender<WorkerState>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        handle: Box<dyn SubscriptionHandle>,
        sink: Arc<dyn Sink>,
        mapper: Arc<dyn EventMapper>,
        signal: CancelSignal,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Running);
        Self {
            name: handle.name().to_string(),
            handle,
            sink,
            mapper,
            signal,
            state_tx,
            stats: WorkerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observe state transitions from outside the worker task.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Run until cancelled or until the handle is closed for good.
    pub async fn run(mut self) -> WorkerReport {
        tracing::info!(worker = %self.name, "worker started");

        let outcome = self.consume().await;

        self.set_state(WorkerState::Draining);
        let Worker { name, handle, state_tx, stats, .. } = self;

        match handle.close().await {
            Ok(()) => tracing::debug!(worker = %name, "subscription handle closed"),
            Err(e) => tracing::warn!(worker = %name, error = %e, "failed to close subscription handle"),
        }
        state_tx.send_replace(WorkerState::Stopped);

        match &outcome {
            WorkerOutcome::Completed => tracing::info!(
                worker = %name,
                received = stats.received,
                acked = stats.acked,
                nacked = stats.nacked,
                "worker stopped"
            ),
            WorkerOutcome::Aborted { reason } => tracing::error!(
                worker = %name,
                reason = %reason,
                received = stats.received,
                "worker aborted"
            ),
        }

        WorkerReport {
            name,
            state: WorkerState::Stopped,
            outcome,
            stats,
            started: true,
        }
    }

    async fn consume(&mut self) -> WorkerOutcome {
        loop {
            if self.signal.is_cancelled() {
                tracing::debug!(worker = %self.name, "cancel observed before receive");
                return WorkerOutcome::Completed;
            }

            match self.handle.receive(&self.signal).await {
                Received::Cancelled => {
                    tracing::debug!(worker = %self.name, "receive cancelled");
                    return WorkerOutcome::Completed;
                }
                Received::Closed { reason } => {
                    return WorkerOutcome::Aborted { reason };
                }
                Received::Failed { error, held } => {
                    self.stats.receive_errors += 1;
                    tracing::warn!(worker = %self.name, error = %error, "receive failed");
                    if let Some(id) = held {
                        self.nack(id).await;
                    }
                    // A handle that fails without suspending must not starve the runtime.
                    tokio::task::yield_now().await;
                }
                Received::Message(message) => {
                    self.stats.received += 1;
                    let (id, delivery) = message.into_parts();
                    tracing::debug!(
                        worker = %self.name,
                        id = %id,
                        topic = %delivery.topic,
                        bytes = delivery.payload.len(),
                        "received message"
                    );

                    let event = self.mapper.map(delivery, now_ms());
                    match self.sink.send(event).await {
                        Ok(()) => {
                            tracing::debug!(worker = %self.name, id = %id, "event sent");
                            self.ack(id).await;
                        }
                        Err(e) => {
                            tracing::warn!(worker = %self.name, id = %id, error = %e, "sink rejected event");
                            self.nack(id).await;
                        }
                    }
                }
            }
        }
    }

    async fn ack(&mut self, id: MessageId) {
        let shown = id.to_string();
        match self.handle.ack(id).await {
            Ok(()) => self.stats.acked += 1,
            Err(e) => {
                self.stats.resolve_errors += 1;
                tracing::warn!(worker = %self.name, id = %shown, error = %e, "ack failed");
            }
        }
    }

    async fn nack(&mut self, id: MessageId) {
        let shown = id.to_string();
        match self.handle.nack(id).await {
            Ok(()) => self.stats.nacked += 1,
            Err(e) => {
                self.stats.resolve_errors += 1;
                tracing::warn!(worker = %self.name, id = %shown, error = %e, "nack failed");
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }
}
