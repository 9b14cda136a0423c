//! Event source adapter.
//!
//! Runs a preferred transport (the SSE stream) and, once it fails or ends,
//! switches to the fallback transport (polling) for the rest of the run. The
//! stream is never re-established. All deliveries go through one ordered
//! channel; after failover only the fallback produces, starting from what the
//! stream had already delivered.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Delivery, Transport};
use crate::domain::{EventOrigin, LogLevel, RawEvent};

/// Composition of a preferred and a fallback transport
pub struct SourceAdapter {
    primary: Option<Box<dyn Transport>>,
    fallback: Box<dyn Transport>,
}

impl SourceAdapter {
    /// Try `primary` first, fall back to `fallback`
    pub fn new(primary: Box<dyn Transport>, fallback: Box<dyn Transport>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    /// Use only the fallback transport
    pub fn fallback_only(fallback: Box<dyn Transport>) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    /// Spawn the producer task feeding `tx` until `cancel` fires
    pub fn spawn(self, tx: mpsc::Sender<Delivery>, cancel: CancellationToken) -> SourceHandle {
        let task = tokio::spawn(self.run(tx, cancel.clone()));
        SourceHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(mut self, tx: mpsc::Sender<Delivery>, cancel: CancellationToken) {
        if let Some(mut primary) = self.primary.take() {
            let mut delivered = Vec::new();
            let stopped = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                stopped = pump_primary(primary.as_mut(), &tx, &mut delivered) => stopped,
            };

            let reason = match stopped {
                PrimaryStop::ReceiverGone => return,
                PrimaryStop::Failed(reason) => reason,
            };
            // Drops the stream body, closing the connection
            drop(primary);
            self.fallback.resume_after(&delivered);

            warn!(%reason, "Progress stream unavailable, falling back to polling");
            let notice = RawEvent::text(
                EventOrigin::Stream,
                Some(LogLevel::Warning),
                format!("Progress stream unavailable ({}), falling back to polling", reason),
            );
            if tx.send(Delivery::Event(notice)).await.is_err() {
                return;
            }
        }

        info!(transport = self.fallback.name(), "Polling for progress");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = pump_fallback(self.fallback.as_mut(), &tx) => {}
        }
    }
}

enum PrimaryStop {
    ReceiverGone,
    Failed(String),
}

async fn pump_primary(
    transport: &mut dyn Transport,
    tx: &mpsc::Sender<Delivery>,
    delivered: &mut Vec<RawEvent>,
) -> PrimaryStop {
    loop {
        match transport.next_batch().await {
            Ok(Some(batch)) => {
                for delivery in batch {
                    if let Delivery::Event(event) = &delivery {
                        delivered.push(event.clone());
                    }
                    if tx.send(delivery).await.is_err() {
                        return PrimaryStop::ReceiverGone;
                    }
                }
            }
            Ok(None) => return PrimaryStop::Failed("stream closed by server".to_string()),
            Err(e) => return PrimaryStop::Failed(e.to_string()),
        }
    }
}

async fn pump_fallback(transport: &mut dyn Transport, tx: &mpsc::Sender<Delivery>) {
    loop {
        match transport.next_batch().await {
            Ok(Some(batch)) => {
                for delivery in batch {
                    if tx.send(delivery).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                info!(transport = transport.name(), "Fallback transport exhausted");
                return;
            }
            // Keep polling until the run ends
            Err(e) => warn!(transport = transport.name(), error = %e, "Progress poll failed"),
        }
    }
}

/// Handle to stop the producer task
pub struct SourceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SourceHandle {
    /// Stop producing and wait for the task to exit. Idempotent.
    ///
    /// Nothing is sent on the channel after this returns.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Event source task ended abnormally");
            }
        }
    }
}
