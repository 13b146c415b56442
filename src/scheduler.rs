//! Re-invocation scheduling.
//!
//! The pipeline never sleeps while waiting on the remote side. It asks a
//! [`Scheduler`] to invoke it again later and returns.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Accepts requests to poll a pipeline again after a delay.
///
/// Implementations guarantee eventual re-invocation, not exact timing, and
/// never run two polls of the same pipeline concurrently.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, pipeline_id: &str, delay: Duration) -> Result<()>;
}

/// In-process scheduler backed by tokio timers.
///
/// Each request spawns a timer task that delivers the pipeline id on the
/// receiver returned from [`LocalScheduler::new`]; the host drains it and
/// polls. Pending timers are lost when the process exits.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    tx: mpsc::Sender<String>,
}

impl LocalScheduler {
    /// Creates a scheduler and the receiver its wake-ups arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn schedule(&self, pipeline_id: &str, delay: Duration) -> Result<()> {
        if self.tx.is_closed() {
            return Err(Error::Schedule("wake-up receiver dropped".to_string()));
        }

        let tx = self.tx.clone();
        let id = pipeline_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(id.clone()).await.is_err() {
                tracing::warn!(pipeline_id = %id, "wake-up receiver dropped");
            }
        });

        tracing::debug!(pipeline_id = %pipeline_id, delay_ms = delay.as_millis() as u64, "scheduled poll");
        Ok(())
    }
}
