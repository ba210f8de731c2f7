use std::sync::Arc;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{PublishError, TransportError};
use crate::record::{EncodedRecord, SequenceToken, StreamDescription, StreamRecord};
use crate::transport::StreamTransport;

/// Writes records to the configured stream transport.
///
/// Publishing never retries. A failed write is reported to the caller with its kind and
/// the caller decides what to do about it. Cloning is cheap and clones share the
/// transport.
#[derive(Clone)]
pub struct StreamPublisher {
    transport: Arc<dyn StreamTransport>,
    max_batch_records: usize,
}

impl StreamPublisher {
    pub fn new(transport: Arc<dyn StreamTransport>, max_batch_records: usize) -> Self {
        Self {
            transport,
            max_batch_records,
        }
    }

    /// Write one record, returning its sequence token.
    pub async fn publish(&self, record: StreamRecord) -> Result<SequenceToken, PublishError> {
        let encoded = encode(record).map_err(|error| {
            report(&error);
            error
        })?;

        let result = self.transport.put(encoded).await;
        match &result {
            Ok(token) => {
                debug!(token = %token, "record published");
                counter!("gateway_records_published_total").increment(1);
            }
            Err(error) => report(error),
        }

        result
    }

    /// Write many records in one transport call.
    ///
    /// The returned vector has one entry per input record, in input order, and each entry
    /// succeeds or fails on its own. The outer error is returned when the batch as a whole
    /// could not be attempted: it is larger than the configured limit, or the transport
    /// failed the call. An empty batch never reaches the transport.
    pub async fn publish_batch(
        &self,
        records: Vec<StreamRecord>,
    ) -> Result<Vec<Result<SequenceToken, PublishError>>, PublishError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if records.len() > self.max_batch_records {
            let error = PublishError::Rejected(format!(
                "batch of {} records exceeds the limit of {}",
                records.len(),
                self.max_batch_records
            ));
            report(&error);
            return Err(error);
        }

        histogram!("gateway_publish_batch_size").record(records.len() as f64);

        let total = records.len();
        let mut results: Vec<Option<Result<SequenceToken, PublishError>>> = vec![None; total];
        let mut positions = Vec::with_capacity(total);
        let mut encoded = Vec::with_capacity(total);

        for (index, record) in records.into_iter().enumerate() {
            match encode(record) {
                Ok(record) => {
                    positions.push(index);
                    encoded.push(record);
                }
                Err(error) => results[index] = Some(Err(error)),
            }
        }

        if !encoded.is_empty() {
            let written = self.transport.put_batch(encoded).await.map_err(|error| {
                warn!(records = total, "batch publish failed: {}", error);
                report(&error);
                error
            })?;

            if written.len() != positions.len() {
                let error = PublishError::TransportUnavailable(format!(
                    "transport acknowledged {} of {} records",
                    written.len(),
                    positions.len()
                ));
                report(&error);
                return Err(error);
            }

            for (index, result) in positions.into_iter().zip(written) {
                results[index] = Some(result);
            }
        }

        let results: Vec<_> = results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    Err(PublishError::TransportUnavailable(
                        "record was not acknowledged".to_owned(),
                    ))
                })
            })
            .collect();

        let published = results.iter().filter(|result| result.is_ok()).count();
        counter!("gateway_records_published_total").increment(published as u64);
        for error in results.iter().filter_map(|result| result.as_ref().err()) {
            report(error);
        }

        Ok(results)
    }

    /// Report on the stream the transport writes to. Carries no stream-write side effects.
    pub async fn describe(&self) -> Result<StreamDescription, TransportError> {
        self.transport.describe().await
    }
}

fn encode(record: StreamRecord) -> Result<EncodedRecord, PublishError> {
    let data = codec::encode(&record.payload)
        .map_err(|error| PublishError::Rejected(error.to_string()))?;

    Ok(EncodedRecord {
        partition_key: record.partition_key,
        data,
    })
}

fn report(error: &PublishError) {
    counter!("gateway_publish_errors_total", "kind" => error.kind().as_str()).increment(1);
}
