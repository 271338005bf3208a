//! # Pump supervisor.
//!
//! Starts one [`Worker`] per subscription handle, shares a single
//! [`CancelSignal`] between them and drains them all on stop.
//!
//! ## Rules
//! - `stop` is idempotent and safe to call from any task.
//! - No worker starts once the signal has fired; a handle that arrives late is
//!   closed without being consumed.
//! - `wait` never fails: abnormal worker endings (including panics) are
//!   reported, not propagated.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use pulsarbeat_api::{CancelSignal, Sink, SubscriptionHandle};

use crate::mapper::EventMapper;
use crate::worker::{Worker, WorkerOutcome, WorkerReport, WorkerState, WorkerStats};

/// Builder for a pump run.
#[derive(Debug, Default)]
pub struct Pump {
    signal: CancelSignal,
}

struct WorkerSlot {
    name: String,
    join: JoinHandle<WorkerReport>,
    state: watch::Receiver<WorkerState>,
}

/// Running pump: the only control surface the process uses.
pub struct PumpHandle {
    signal: CancelSignal,
    workers: Vec<WorkerSlot>,
}

/// Cloneable stop trigger, detached from the [`PumpHandle`].
#[derive(Debug, Clone)]
pub struct PumpStopper {
    signal: CancelSignal,
}

/// Aggregated result of [`PumpHandle::wait`].
#[derive(Debug, Clone, Default)]
pub struct PumpReport {
    pub workers: Vec<WorkerReport>,
}

impl Pump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally owned signal. Triggering it stops the pump, and
    /// if it already fired no worker is started at all.
    pub fn with_signal(signal: CancelSignal) -> Self {
        Self { signal }
    }

    /// Start a pump with a fresh signal.
    pub fn start(
        handles: Vec<Box<dyn SubscriptionHandle>>,
        sink: Arc<dyn Sink>,
        mapper: Arc<dyn EventMapper>,
    ) -> PumpHandle {
        Self::new().spawn(handles, sink, mapper)
    }

    /// Spawn one worker task per handle. Must be called inside a tokio runtime.
    pub fn spawn(
        self,
        handles: Vec<Box<dyn SubscriptionHandle>>,
        sink: Arc<dyn Sink>,
        mapper: Arc<dyn EventMapper>,
    ) -> PumpHandle {
        let signal = self.signal;
        let mut workers = Vec::with_capacity(handles.len());

        for handle in handles {
            if signal.is_cancelled() {
                workers.push(skip_worker(handle));
                continue;
            }

            let worker = Worker::new(handle, sink.clone(), mapper.clone(), signal.clone());
            let name = worker.name().to_string();
            let state = worker.subscribe_state();
            let join = tokio::spawn(worker.run());
            workers.push(WorkerSlot { name, join, state });
        }

        tracing::info!(workers = workers.len(), "pump started");
        PumpHandle { signal, workers }
    }
}

/// Close a handle that arrived after stop, without consuming from it.
fn skip_worker(handle: Box<dyn SubscriptionHandle>) -> WorkerSlot {
    let name = handle.name().to_string();
    let (_, state) = watch::channel(WorkerState::Stopped);
    tracing::info!(worker = %name, "pump already stopping, closing handle without starting");

    let report_name = name.clone();
    let join = tokio::spawn(async move {
        if let Err(e) = handle.close().await {
            tracing::warn!(worker = %report_name, error = %e, "failed to close subscription handle");
        }
        WorkerReport {
            name: report_name,
            state: WorkerState::Stopped,
            outcome: WorkerOutcome::Completed,
            stats: WorkerStats::default(),
            started: false,
        }
    });
    WorkerSlot { name, join, state }
}

impl PumpHandle {
    /// Request shutdown. Returns `true` if this call fired the signal.
    pub fn stop(&self) -> bool {
        let fired = self.signal.trigger();
        if fired {
            tracing::info!(workers = self.workers.len(), "pump stop requested");
        }
        fired
    }

    pub fn stopper(&self) -> PumpStopper {
        PumpStopper {
            signal: self.signal.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current state of every worker, in start order.
    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.name.clone(), *w.state.borrow()))
            .collect()
    }

    /// Wait until every worker reached `Stopped`.
    ///
    /// Does not stop the pump by itself; call [`stop`](Self::stop) first (or
    /// from another task) unless every handle is expected to close on its own.
    pub async fn wait(self) -> PumpReport {
        let mut reports = Vec::with_capacity(self.workers.len());

        for slot in self.workers {
            let report = match slot.join.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(worker = %slot.name, error = %e, "worker task failed");
                    WorkerReport {
                        name: slot.name,
                        state: WorkerState::Stopped,
                        outcome: WorkerOutcome::Aborted {
                            reason: format!("worker task failed: {e}"),
                        },
                        stats: WorkerStats::default(),
                        started: true,
                    }
                }
            };
            reports.push(report);
        }

        let report = PumpReport { workers: reports };
        tracing::info!(
            workers = report.workers.len(),
            aborted = report.abnormal().count(),
            "pump drained"
        );
        report
    }
}

impl PumpStopper {
    /// Same as [`PumpHandle::stop`].
    pub fn stop(&self) -> bool {
        let fired = self.signal.trigger();
        if fired {
            tracing::info!("pump stop requested");
        }
        fired
    }
}

impl PumpReport {
    /// Workers that ended abnormally.
    pub fn abnormal(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.outcome.is_abnormal())
    }

    pub fn all_stopped(&self) -> bool {
        self.workers.iter().all(|w| w.state == WorkerState::Stopped)
    }

    /// Sum of all worker counters.
    pub fn totals(&self) -> WorkerStats {
        self.workers.iter().fold(WorkerStats::default(), |mut acc, w| {
            acc.received += w.stats.received;
            acc.acked += w.stats.acked;
            acc.nacked += w.stats.nacked;
            acc.receive_errors += w.stats.receive_errors;
            acc.resolve_errors += w.stats.resolve_errors;
            acc
        })
    }
}
