use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::MetricBatchJob;
use crate::error::Result;
use crate::extract::ExtractStore;
use crate::service::DataService;

/// One unit of batch work: the id of the entity to export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBatch {
    pub batch_context: String,
}

impl MetricBatch {
    pub fn new(batch_context: impl Into<String>) -> Self {
        Self {
            batch_context: batch_context.into(),
        }
    }
}

/// Receives batches scheduled by a job's start phase.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    async fn schedule(&self, batch: MetricBatch) -> Result<()>;
}

/// In-process FIFO scheduler.
#[derive(Clone, Default)]
pub struct QueuedScheduler {
    queue: Arc<Mutex<VecDeque<MetricBatch>>>,
}

impl QueuedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Snapshot of the queued batches, oldest first.
    pub async fn pending(&self) -> Vec<MetricBatch> {
        self.queue.lock().await.iter().cloned().collect()
    }

    /// Processes queued batches one at a time until the queue is empty.
    ///
    /// Stops at the first failing batch; that batch is dropped and the rest
    /// stay queued. Returns the number of rows inserted.
    pub async fn run_all(
        &self,
        job: &MetricBatchJob,
        service: &dyn DataService,
        store: &dyn ExtractStore,
    ) -> Result<usize> {
        let mut rows = 0;
        let mut batches = 0;
        loop {
            // The lock is released before the batch runs.
            let next = self.queue.lock().await.pop_front();
            let Some(batch) = next else {
                break;
            };
            rows += job.process_batch(&batch, service, store).await?;
            batches += 1;
        }
        info!(batches, rows, "Drained batch queue");
        Ok(rows)
    }
}

#[async_trait]
impl BatchScheduler for QueuedScheduler {
    async fn schedule(&self, batch: MetricBatch) -> Result<()> {
        debug!(batch_context = %batch.batch_context, "Scheduled batch");
        self.queue.lock().await.push_back(batch);
        Ok(())
    }
}
