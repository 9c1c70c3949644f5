//! Retrying delivery queue for the async dispatch path.
//!
//! A task moves `Pending -> Attempting -> Delivered | Pending(retry) |
//! Failed`. Exhausted tasks are logged with the full record and pushed onto a
//! dead-letter channel the host can wire into its own alerting; the relay
//! keeps no local audit store, so that log line is the durability backstop.

use crate::delivery::record::LogRecord;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Retry policy for queued deliveries.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Total attempts before a task is marked failed.
    pub max_tries: u32,
    /// Delay before the next attempt, indexed by failed attempts so far.
    pub backoff: Vec<Duration>,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            // Retry after 1 min, 5 mins, 30 mins.
            backoff: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(1800),
            ],
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// One pending or retrying delivery, owned by the queue while enqueued.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub record: LogRecord,
    pub api_key: String,
    pub endpoint: String,
    pub attempts: u32,
}

impl DeliveryTask {
    pub fn new(record: LogRecord, api_key: String, endpoint: String) -> Self {
        Self {
            record,
            api_key,
            endpoint,
            attempts: 0,
        }
    }
}

/// A delivery that exhausted its retries.
#[derive(Debug)]
pub struct FailedDelivery {
    pub record: LogRecord,
    pub endpoint: String,
    pub attempts: u32,
    pub error: String,
}

/// Accepts [`DeliveryTask`]s and drives them to a terminal state on a
/// background worker. Tasks are processed concurrently; no ordering is
/// guaranteed between deliveries, and a retried task may land after records
/// queued later.
pub struct DeliveryQueue {
    tx: UnboundedSender<DeliveryTask>,
    failed_rx: Mutex<Option<UnboundedReceiver<FailedDelivery>>>,
}

impl DeliveryQueue {
    /// Create the queue and spawn its worker. Must be called within a tokio
    /// runtime.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            client: Client::new(),
            config,
            tx: tx.clone(),
            failed_tx,
        };
        tokio::spawn(worker.run(rx));

        Arc::new(Self {
            tx,
            failed_rx: Mutex::new(Some(failed_rx)),
        })
    }

    /// Queue a delivery. Returns immediately; the worker owns the task from
    /// here on.
    pub fn enqueue(&self, task: DeliveryTask) {
        if self.tx.send(task).is_err() {
            error!("delivery queue worker is gone, dropping log record");
        }
    }

    /// Take the dead-letter receiver. Yields every delivery that exhausted
    /// its retries. Can be taken once.
    pub async fn take_failed(&self) -> Option<UnboundedReceiver<FailedDelivery>> {
        self.failed_rx.lock().await.take()
    }
}

struct Worker {
    client: Client,
    config: QueueConfig,
    /// Hands retried tasks back to the queue.
    tx: UnboundedSender<DeliveryTask>,
    failed_tx: UnboundedSender<FailedDelivery>,
}

impl Worker {
    async fn run(self, mut rx: UnboundedReceiver<DeliveryTask>) {
        let worker = Arc::new(self);
        while let Some(task) = rx.recv().await {
            let worker = worker.clone();
            tokio::spawn(async move { worker.process(task).await });
        }
        debug!("delivery queue worker stopped");
    }

    async fn process(&self, mut task: DeliveryTask) {
        let error = match self.attempt(&task).await {
            Ok(()) => {
                debug!(
                    "delivered {} audit for {} [{}] on attempt {}",
                    task.record.action_type,
                    task.record.entity_type,
                    task.record.entity_id,
                    task.attempts + 1
                );
                return;
            }
            Err(e) => e,
        };

        task.attempts += 1;
        if task.attempts < self.config.max_tries {
            let delay = self.backoff_for(task.attempts);
            warn!(
                "log delivery failed (attempt {}/{}), retrying in {:?}: {}",
                task.attempts, self.config.max_tries, delay, error
            );
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(task);
            });
        } else {
            // Highest-severity backstop: the full record goes into the log
            // before the task leaves the queue for the dead-letter channel.
            error!(
                "failed to send log to api after all retries: {}; log_record={}",
                error,
                serde_json::to_string(&task.record)
                    .unwrap_or_else(|_| "<unserializable>".to_string())
            );
            let _ = self.failed_tx.send(FailedDelivery {
                record: task.record,
                endpoint: task.endpoint,
                attempts: task.attempts,
                error,
            });
        }
    }

    fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let index = (failed_attempts as usize).saturating_sub(1);
        self.config
            .backoff
            .get(index)
            .or_else(|| self.config.backoff.last())
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }

    async fn attempt(&self, task: &DeliveryTask) -> Result<(), String> {
        let response = self
            .client
            .post(&task.endpoint)
            .bearer_auth(&task.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .json(&task.record)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!(
                "log endpoint returned status {}",
                response.status()
            ))
        }
    }
}
