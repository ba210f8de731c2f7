//! Push delivery: batches posted by a stream trigger rather than polled by the worker.
use serde::{Deserialize, Serialize};

use gateway_common::record::{DataEncoding, DispatchBatch, Payload, RawRecord};

use crate::dispatcher::{DispatchFailure, DispatchResult};

/// The envelope a stream trigger posts: record data is base64 text wrapping JSON.
#[derive(Debug, Deserialize, Serialize)]
pub struct TriggerEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<TriggerRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TriggerRecord {
    pub kinesis: TriggerRecordData,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecordData {
    pub data: String,
    pub sequence_number: String,
    #[serde(default)]
    pub partition_key: Option<String>,
}

impl From<TriggerEnvelope> for DispatchBatch {
    fn from(envelope: TriggerEnvelope) -> Self {
        envelope
            .records
            .into_iter()
            .map(|record| RawRecord {
                record_id: record.kinesis.sequence_number,
                partition_key: record.kinesis.partition_key,
                data: record.kinesis.data.into_bytes(),
                encoding: DataEncoding::Base64Json,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessedRecord {
    pub record_id: String,
    pub processed_at: String,
    pub data: Payload,
}

/// What the trigger gets back for a pushed batch.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: String,
    pub processed: usize,
    pub failures: Vec<DispatchFailure>,
    pub processed_records: Vec<ProcessedRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl From<DispatchResult> for TriggerResponse {
    fn from(result: DispatchResult) -> Self {
        let processed_records = result
            .events
            .into_iter()
            .filter_map(|event| {
                let processed_at = event
                    .processing_timestamp
                    .format(&time::format_description::well_known::Rfc3339)
                    .ok()?;
                Some(ProcessedRecord {
                    record_id: event.record_id,
                    processed_at,
                    data: event.result?,
                })
            })
            .collect();

        Self {
            message: format!("Processed {} records", result.processed),
            processed: result.processed,
            failures: result.failures,
            processed_records,
            skipped: result.skipped,
        }
    }
}
