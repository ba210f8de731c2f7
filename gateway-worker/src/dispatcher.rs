//! Turning a batch of raw stream records into handler results in the sink.
//!
//! Records are handled one at a time, in the order the transport delivered them. A record
//! that fails at any step (decode, handler lookup, handler, sink write) is reported and the
//! batch moves on to the next record.
//!
//! Sink writes are not transactional with handlers. When the write fails the record is
//! reported as failed, but whatever the handler computed is neither persisted nor undone.
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gateway_common::codec;
use gateway_common::record::{DispatchBatch, Payload, RawRecord};

use crate::error::{DispatchError, FailureKind, HandlerError};
use crate::registry::{Category, HandlerRegistry, SharedHandler};
use crate::sink::SinkWriter;

/// A failed record, with enough detail to alert on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub record_id: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

/// A decoded record and what became of it.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEvent {
    pub record_id: String,
    pub category: String,
    pub payload: Payload,
    /// The handler's result, when the handler succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(with = "time::serde::rfc3339")]
    pub processing_timestamp: OffsetDateTime,
    pub outcome: Outcome,
}

impl ProcessedEvent {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchResult {
    /// Records whose handler and sink write both succeeded.
    pub processed: usize,
    /// Failed records, in delivery order.
    pub failures: Vec<DispatchFailure>,
    /// Every record that decoded, in delivery order.
    pub events: Vec<ProcessedEvent>,
    /// Ids of records left unstarted because the cycle was cancelled.
    pub skipped: Vec<String>,
}

impl DispatchResult {
    fn fail(&mut self, record_id: &str, error: DispatchError) {
        let kind = error.kind();
        warn!(record_id, kind = kind.as_str(), "failed to process record: {}", error);
        counter!("gateway_dispatch_failures_total", "kind" => kind.as_str()).increment(1);

        self.failures.push(DispatchFailure {
            record_id: record_id.to_owned(),
            kind,
            message: error.to_string(),
        });
    }
}

/// Runs batches of records through the handler registry into the sink.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sink: SinkWriter,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sink: SinkWriter) -> Self {
        Self { registry, sink }
    }

    /// Process every record in `batch`, collecting per-record outcomes.
    ///
    /// Once `shutdown` is cancelled no new record is started. A record already being
    /// handled still gets its sink write; the remaining ids end up in `skipped`.
    pub async fn dispatch(
        &self,
        batch: DispatchBatch,
        shutdown: &CancellationToken,
    ) -> DispatchResult {
        let start = Instant::now();
        let total = batch.len();
        let mut result = DispatchResult::default();
        let mut records = batch.into_iter();

        while let Some(record) = records.next() {
            if shutdown.is_cancelled() {
                result.skipped.push(record.record_id);
                result
                    .skipped
                    .extend(records.by_ref().map(|record| record.record_id));
                break;
            }

            self.dispatch_record(record, &mut result).await;
        }

        counter!("gateway_dispatch_records_total", "outcome" => "processed")
            .increment(result.processed as u64);
        counter!("gateway_dispatch_records_total", "outcome" => "failed")
            .increment(result.failures.len() as u64);
        counter!("gateway_dispatch_records_total", "outcome" => "skipped")
            .increment(result.skipped.len() as u64);
        histogram!("gateway_dispatch_batch_duration_seconds").record(start.elapsed().as_secs_f64());

        if !result.skipped.is_empty() {
            info!(
                skipped = result.skipped.len(),
                "dispatch cancelled before the batch completed"
            );
        }
        debug!(
            records = total,
            processed = result.processed,
            failed = result.failures.len(),
            "batch dispatched"
        );

        result
    }

    async fn dispatch_record(&self, record: RawRecord, result: &mut DispatchResult) {
        let RawRecord { record_id, .. } = &record;

        let payload = match codec::decode_raw(&record) {
            Ok(payload) => payload,
            Err(error) => return result.fail(record_id, error.into()),
        };

        let category = Category::of(&payload);
        let processing_timestamp = OffsetDateTime::now_utc();

        let outcome = match self.registry.lookup(&category) {
            None => Err(DispatchError::NoHandler(category.clone())),
            Some(handler) => match run_handler(handler, payload.clone()).await {
                Err(error) => Err(error.into()),
                Ok(value) => match self.sink.write(record_id, &value).await {
                    Ok(()) => Ok(value),
                    Err(error) => Err(DispatchError::SinkWrite(error)),
                },
            },
        };

        let (value, outcome) = match outcome {
            Ok(value) => {
                result.processed += 1;
                (Some(value), Outcome::Succeeded)
            }
            Err(error) => {
                let outcome = Outcome::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                };
                result.fail(record_id, error);
                (None, outcome)
            }
        };

        result.events.push(ProcessedEvent {
            record_id: record_id.clone(),
            category: category.to_string(),
            payload,
            result: value,
            processing_timestamp,
            outcome,
        });
    }
}

/// Run a handler on the blocking pool. A panicking handler is reported as a failure.
async fn run_handler(handler: SharedHandler, payload: Payload) -> Result<Payload, HandlerError> {
    tokio::task::spawn_blocking(move || handler.handle(&payload))
        .await
        .unwrap_or_else(|error| Err(HandlerError::new(format!("handler aborted: {error}"))))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use gateway_common::record::RawRecord;

    use super::*;
    use crate::error::SinkError;
    use crate::handlers::annotate_reading;
    use crate::sink::{MemorySinkStore, SinkStore};

    fn setup() -> (Dispatcher, Arc<HandlerRegistry>, Arc<MemorySinkStore>) {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Category::Default, annotate_reading);
        let store = Arc::new(MemorySinkStore::new());
        let dispatcher = Dispatcher::new(registry.clone(), SinkWriter::new(store.clone()));

        (dispatcher, registry, store)
    }

    fn record(id: &str, data: &str) -> RawRecord {
        RawRecord::json(id, data)
    }

    #[tokio::test]
    async fn test_undecodable_record_does_not_stop_the_batch() {
        let (dispatcher, _, store) = setup();
        let batch = DispatchBatch::new(vec![
            record("0-1", r#"{"value": 1}"#),
            record("0-2", "not json"),
            record("0-3", r#"{"value": 300}"#),
        ]);

        let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

        assert_eq!(result.processed, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].record_id, "0-2");
        assert_eq!(result.failures[0].kind, FailureKind::DecodeError);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("0-3").unwrap()["alert"], json!("HIGH_VALUE_ALERT"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_only_that_record() {
        let (dispatcher, _, store) = setup();
        let batch = DispatchBatch::new(vec![
            record("0-1", r#"{"value": 1}"#),
            record("0-2", r#"{"category": "billing", "value": 2}"#),
            record("0-3", r#"{"value": 3}"#),
        ]);

        let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

        assert_eq!(result.processed, 2);
        assert_eq!(
            result.failures,
            vec![DispatchFailure {
                record_id: "0-2".to_owned(),
                kind: FailureKind::NoHandlerError,
                message: "no handler registered for category billing".to_owned(),
            }]
        );
        assert!(store.get("0-2").is_none());
        assert_eq!(result.events.len(), 3);
        assert!(!result.events[1].succeeded());
    }

    #[tokio::test]
    async fn test_handler_failures_carry_handler_detail() {
        let (dispatcher, registry, _) = setup();
        registry.register(
            "sensor",
            |_: &Payload| -> Result<Payload, HandlerError> { Err(HandlerError::new("bad reading")) },
        );

        let batch = DispatchBatch::new(vec![record("0-1", r#"{"category": "sensor"}"#)]);
        let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

        assert_eq!(result.processed, 0);
        assert_eq!(result.failures[0].kind, FailureKind::HandlerError);
        assert!(result.failures[0].message.contains("bad reading"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_a_handler_failure() {
        let (dispatcher, registry, _) = setup();
        registry.register("sensor", |_: &Payload| -> Result<Payload, HandlerError> {
            panic!("handler bug")
        });

        let batch = DispatchBatch::new(vec![
            record("0-1", r#"{"category": "sensor"}"#),
            record("0-2", r#"{"value": 2}"#),
        ]);
        let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

        assert_eq!(result.processed, 1);
        assert_eq!(result.failures[0].kind, FailureKind::HandlerError);
    }

    struct BrokenSink;

    #[async_trait]
    impl SinkStore for BrokenSink {
        async fn write(&self, _key: &str, _value: &Payload) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("table is gone".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_marks_record_failed() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Category::Default, annotate_reading);
        let dispatcher = Dispatcher::new(registry, SinkWriter::new(Arc::new(BrokenSink)));

        let batch = DispatchBatch::new(vec![record("0-1", r#"{"value": 1}"#)]);
        let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

        assert_eq!(result.processed, 0);
        assert_eq!(result.failures[0].kind, FailureKind::SinkWriteError);
        // The handler ran: its result is still reported, just not persisted.
        assert_eq!(result.events[0].result.as_ref().unwrap()["processed"], json!(true));
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_starts_no_records() {
        let (dispatcher, _, store) = setup();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let batch = DispatchBatch::new(vec![
            record("0-1", r#"{"value": 1}"#),
            record("0-2", r#"{"value": 2}"#),
        ]);
        let result = dispatcher.dispatch(batch, &shutdown).await;

        assert_eq!(result.processed, 0);
        assert!(result.failures.is_empty());
        assert_eq!(result.skipped, vec!["0-1".to_owned(), "0-2".to_owned()]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_record_finish() {
        let registry = Arc::new(HandlerRegistry::new());
        let store = Arc::new(MemorySinkStore::new());
        let dispatcher = Dispatcher::new(registry.clone(), SinkWriter::new(store.clone()));
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        registry.register(
            Category::Default,
            move |payload: &Payload| -> Result<Payload, HandlerError> {
                cancel.cancel();
                Ok(payload.clone())
            },
        );

        let batch = DispatchBatch::new(vec![
            record("0-1", r#"{"value": 1}"#),
            record("0-2", r#"{"value": 2}"#),
            record("0-3", r#"{"value": 3}"#),
        ]);
        let result = dispatcher.dispatch(batch, &shutdown).await;

        assert_eq!(result.processed, 1);
        assert_eq!(store.get("0-1"), Some(json!({"value": 1})));
        assert_eq!(result.skipped, vec!["0-2".to_owned(), "0-3".to_owned()]);
    }

    #[tokio::test]
    async fn test_base64_records_are_decoded() {
        let (dispatcher, _, store) = setup();
        let data = codec::encode_base64(&json!({"value": 5})).unwrap();
        let mut raw = RawRecord::json("seq-1", data);
        raw.encoding = gateway_common::record::DataEncoding::Base64Json;

        let result = dispatcher
            .dispatch(DispatchBatch::new(vec![raw]), &CancellationToken::new())
            .await;

        assert_eq!(result.processed, 1);
        assert_eq!(store.get("seq-1").unwrap()["value"], json!(5));
    }
}
