//! Trace session: wires an event source to the merge engine.
//!
//! Two tasks joined by a bounded channel:
//! - the source adapter task produces deliveries in arrival order
//! - the consumer task owns the [`RunState`], classifies and merges each
//!   delivery sequentially, and publishes a snapshot after every change
//!
//! Readers never touch the live state; they receive cloned [`RunSnapshot`]s
//! through a watch channel.

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{Delivery, SourceAdapter, SourceHandle};
use crate::domain::{RunOutcome, RunState};

use super::classifier::classify;
use super::merge::{self, MergeOutcome};
use super::tracker::{derive_status, Progress};

/// Consistent view of the run published after each change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub state: RunState,
    pub progress: Progress,

    /// Whether the event source can still deliver
    pub sources_open: bool,
}

impl RunSnapshot {
    /// Snapshot of `state` with its derived progress
    pub fn capture(state: &RunState, sources_open: bool) -> Self {
        Self {
            state: state.clone(),
            progress: derive_status(state),
            sources_open,
        }
    }

    /// Whether no further change will arrive on its own
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() || !self.sources_open
    }
}

enum Control {
    Finish(RunOutcome),
}

/// A watched automation run
pub struct TraceSession {
    run_id: Uuid,
    source: SourceHandle,
    control: mpsc::Sender<Control>,
    cancel: CancellationToken,
    consumer: Option<JoinHandle<()>>,
    snapshots: watch::Receiver<RunSnapshot>,
}

impl TraceSession {
    /// Start consuming `adapter` into a fresh run
    pub fn start(adapter: SourceAdapter, queue_capacity: usize) -> Self {
        let state = RunState::new();
        let run_id = state.run_id;

        let cancel = CancellationToken::new();
        let source_cancel = cancel.child_token();

        let (tx, events) = mpsc::channel(queue_capacity.max(1));
        let (control_tx, control) = mpsc::channel(1);
        let (snapshot_tx, snapshots) = watch::channel(RunSnapshot::capture(&state, true));

        let source = adapter.spawn(tx, source_cancel.clone());

        let consumer = Consumer {
            state,
            events,
            control,
            snapshots: snapshot_tx,
            cancel: cancel.clone(),
            source_cancel,
            sources_open: true,
        };
        let task = tokio::spawn(
            consumer
                .run()
                .instrument(info_span!("trace_session", %run_id)),
        );

        info!(%run_id, "Trace session started");
        Self {
            run_id,
            source,
            control: control_tx,
            cancel,
            consumer: Some(task),
            snapshots,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Stop the sources, merge whatever is still queued, then apply `outcome`.
    ///
    /// A run that already turned terminal keeps its status.
    #[instrument(skip(self, outcome), fields(run_id = %self.run_id))]
    pub async fn finish(&mut self, outcome: RunOutcome) -> RunSnapshot {
        self.source.stop().await;
        if self.control.send(Control::Finish(outcome)).await.is_err() {
            debug!(run_id = %self.run_id, "Consumer already stopped");
        }
        self.join_consumer().await;
        self.snapshot()
    }

    /// Stop everything without draining. Idempotent.
    ///
    /// The run state is not mutated after this returns.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn cancel(&mut self) -> RunSnapshot {
        self.cancel.cancel();
        self.source.stop().await;
        self.join_consumer().await;
        self.snapshot()
    }

    /// Wait until the run turns terminal or the sources are exhausted
    pub async fn wait(&self) -> RunSnapshot {
        let mut rx = self.snapshots.clone();
        let settled = rx.wait_for(RunSnapshot::is_settled).await.map(|s| s.clone());
        match settled {
            Ok(snapshot) => snapshot,
            // Consumer gone: its last publish is final
            Err(_) => rx.borrow().clone(),
        }
    }

    async fn join_consumer(&mut self) {
        if let Some(task) = self.consumer.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Trace consumer ended abnormally");
            }
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Single writer of the run state
struct Consumer {
    state: RunState,
    events: mpsc::Receiver<Delivery>,
    control: mpsc::Receiver<Control>,
    snapshots: watch::Sender<RunSnapshot>,
    cancel: CancellationToken,
    source_cancel: CancellationToken,
    sources_open: bool,
}

impl Consumer {
    async fn run(mut self) {
        merge::begin(&mut self.state);
        self.publish();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Trace session cancelled");
                    break;
                }
                control = self.control.recv() => {
                    if let Some(Control::Finish(outcome)) = control {
                        self.drain();
                        if merge::apply_outcome(&mut self.state, outcome) {
                            self.publish();
                        }
                    }
                    break;
                }
                delivery = self.events.recv(), if self.sources_open => match delivery {
                    Some(delivery) => {
                        if self.handle(delivery) {
                            self.publish();
                        }
                    }
                    None => {
                        info!("Event sources exhausted");
                        self.sources_open = false;
                        self.publish();
                    }
                },
            }

            if self.state.is_terminal() {
                self.source_cancel.cancel();
                break;
            }
        }

        info!(
            status = %self.state.status,
            steps = self.state.steps.len(),
            entries = self.state.log.len(),
            "Trace session finished"
        );
    }

    /// Merge everything already queued
    fn drain(&mut self) {
        let mut changed = false;
        while let Ok(delivery) = self.events.try_recv() {
            changed |= self.handle(delivery);
        }
        if changed {
            self.publish();
        }
    }

    fn handle(&mut self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Event(event) => {
                let classified = classify(&event);
                let outcome = merge::apply(&mut self.state, &classified);
                match &outcome {
                    MergeOutcome::Created { step_id } => {
                        debug!(step_id = %step_id, source = %event.source, "Step created")
                    }
                    MergeOutcome::Completed => info!("Task completion reported"),
                    _ => {}
                }
                outcome != MergeOutcome::Frozen
            }
            Delivery::Status(status) => merge::apply_server_status(&mut self.state, &status),
        }
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(RunSnapshot::capture(&self.state, self.sources_open));
    }
}
