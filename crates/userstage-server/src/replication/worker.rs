//! Pool of long-lived replication workers
//!
//! Workers share one [`ReplicationConsumer`] and never coordinate with each other;
//! the queue lease and the relational batch marker provide all the exclusion
//! needed. A failed message or queue outage never ends a worker.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MessageOutcome, ReplicationConsumer};

pub struct ReplicationWorkerPool {
    consumer: Arc<ReplicationConsumer>,
    workers: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ReplicationWorkerPool {
    pub fn new(consumer: Arc<ReplicationConsumer>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            consumer,
            workers: workers.max(1),
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops every worker once cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the workers; the returned handle completes after all of them stopped
    pub fn start(self) -> JoinHandle<()> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let pool_id = Uuid::new_v4().simple().to_string();

        let handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|n| {
                let consumer_id = format!("{}-{}-{}", hostname, &pool_id[..8], n);
                tokio::spawn(run_worker(
                    self.consumer.clone(),
                    consumer_id,
                    self.poll_interval,
                    self.cancel.clone(),
                ))
            })
            .collect();

        info!(workers = self.workers, "Replication workers started");

        tokio::spawn(async move {
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    warn!(error = %e, "Replication worker task ended abnormally");
                }
            }
            info!("Replication workers stopped");
        })
    }
}

async fn run_worker(
    consumer: Arc<ReplicationConsumer>,
    consumer_id: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    info!(consumer_id = %consumer_id, "Replication worker running");

    while !cancel.is_cancelled() {
        match consumer.poll_once(&consumer_id).await {
            Ok(Some(outcome)) => {
                log_outcome(&consumer_id, &outcome);
                // More work is likely queued; poll again right away
                continue;
            },
            Ok(None) => {},
            Err(e) => {
                warn!(consumer_id = %consumer_id, error = %e, "Queue poll failed");
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {},
        }
    }

    info!(consumer_id = %consumer_id, "Replication worker stopped");
}

fn log_outcome(consumer_id: &str, outcome: &MessageOutcome) {
    match outcome {
        MessageOutcome::Replicated { rows } => {
            debug!(consumer_id, rows, "Message replicated")
        },
        MessageOutcome::AlreadyReplicated => debug!(consumer_id, "Duplicate message skipped"),
        MessageOutcome::DeadLettered { reason } => {
            debug!(consumer_id, reason = %reason, "Message dead-lettered")
        },
        MessageOutcome::Retrying { attempt, delay } => debug!(
            consumer_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Message scheduled for retry"
        ),
    }
}
