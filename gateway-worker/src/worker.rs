use std::sync::Arc;
use std::time;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gateway_common::transport::StreamTransport;

use crate::dispatcher::Dispatcher;

/// A worker polling the stream transport and dispatching whatever it returns.
pub struct StreamWorker {
    /// An identifier for this worker, used in logs.
    name: String,
    /// The transport we pull records from.
    transport: Arc<dyn StreamTransport>,
    dispatcher: Dispatcher,
    /// The interval for polling the transport.
    poll_interval: time::Duration,
    /// Upper bound on the records handed to one dispatch cycle.
    max_records_per_poll: usize,
}

impl StreamWorker {
    pub fn new(
        name: &str,
        transport: Arc<dyn StreamTransport>,
        dispatcher: Dispatcher,
        poll_interval: time::Duration,
        max_records_per_poll: usize,
    ) -> Self {
        Self {
            name: name.to_owned(),
            transport,
            dispatcher,
            poll_interval,
            max_records_per_poll,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Batches are dispatched one after the other. Poll failures are logged and retried
    /// on the next tick. On shutdown the current record finishes and the rest of its
    /// batch is released back to the transport for redelivery.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        info!(worker = %self.name, "stream worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.transport.poll(self.max_records_per_poll) => polled,
            };

            let batch = match batch {
                Ok(batch) if batch.is_empty() => continue,
                Ok(batch) => batch,
                Err(e) => {
                    error!(worker = %self.name, "failed to poll stream: {}", e);
                    metrics::counter!("gateway_worker_poll_errors_total").increment(1);
                    continue;
                }
            };

            metrics::counter!("gateway_worker_batches_total").increment(1);
            let mut started: Vec<String> = batch
                .records()
                .iter()
                .map(|record| record.record_id.clone())
                .collect();

            let result = self.dispatcher.dispatch(batch, &shutdown).await;
            if !result.failures.is_empty() {
                info!(
                    worker = %self.name,
                    processed = result.processed,
                    failed = result.failures.len(),
                    "batch dispatched with failures"
                );
            }

            // Skipped records are always the tail of the batch
            started.truncate(started.len().saturating_sub(result.skipped.len()));
            if let Err(e) = self.transport.acknowledge(&started).await {
                error!(worker = %self.name, "failed to acknowledge records: {}", e);
            }

            if !result.skipped.is_empty() {
                warn!(
                    worker = %self.name,
                    skipped = ?result.skipped,
                    "records left unstarted, releasing them for redelivery"
                );
                metrics::counter!("gateway_worker_skipped_records_total")
                    .increment(result.skipped.len() as u64);
                if let Err(e) = self.transport.release(&result.skipped).await {
                    error!(worker = %self.name, "failed to release skipped records: {}", e);
                }
            }
        }

        info!(worker = %self.name, "stream worker stopped");
    }
}
