use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gateway_common::error::{PublishError, PublishErrorKind, TransportError};
use gateway_common::record::{Payload, SequenceToken};

pub const DEFAULT_PARTITION_KEY: &str = "default";

fn default_partition_key() -> String {
    DEFAULT_PARTITION_KEY.to_owned()
}

/// The body of a request to publish one record.
#[derive(Debug, Deserialize, Serialize)]
pub struct PublishRequest {
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    pub data: Payload,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct PublishResponse {
    pub success: bool,
    pub sequence_number: SequenceToken,
}

/// A batch entry: either a bare payload, published under the batch partition key, or a
/// payload with its own key.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Keyed {
        partition_key: String,
        data: Payload,
    },
    Bare(Payload),
}

/// The body of a request to publish many records in one call.
#[derive(Debug, Deserialize, Serialize)]
pub struct PublishBatchRequest {
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    pub records: Vec<BatchEntry>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum BatchRecordResult {
    Published {
        sequence_number: SequenceToken,
    },
    Failed {
        error: String,
        kind: PublishErrorKind,
    },
}

impl From<Result<SequenceToken, PublishError>> for BatchRecordResult {
    fn from(result: Result<SequenceToken, PublishError>) -> Self {
        match result {
            Ok(sequence_number) => BatchRecordResult::Published { sequence_number },
            Err(error) => BatchRecordResult::Failed {
                error: error.to_string(),
                kind: error.kind(),
            },
        }
    }
}

/// Results in the order the records were submitted.
#[derive(Debug, Serialize, PartialEq)]
pub struct PublishBatchResponse {
    pub records: Vec<BatchRecordResult>,
    pub failed_record_count: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<PublishErrorKind>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to stamp record: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Publish(error @ PublishError::Rejected(_)) => {
                (StatusCode::BAD_REQUEST, Some(error.kind()))
            }
            ApiError::Publish(error @ PublishError::TransportUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, Some(error.kind()))
            }
            ApiError::Transport(TransportError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            ApiError::Transport(TransportError::Configuration(_)) | ApiError::Timestamp(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_batch_entries_accept_both_shapes() {
        let request: PublishBatchRequest = serde_json::from_value(json!({
            "records": [
                {"value": 1},
                {"partition_key": "shard-9", "data": {"value": 2}},
                {"data": {"value": 3}},
            ]
        }))
        .unwrap();

        assert_eq!(request.partition_key, DEFAULT_PARTITION_KEY);
        assert!(matches!(request.records[0], BatchEntry::Bare(_)));
        assert!(matches!(
            &request.records[1],
            BatchEntry::Keyed { partition_key, .. } if partition_key == "shard-9"
        ));
        // Without a partition key the object is itself the payload.
        assert!(matches!(request.records[2], BatchEntry::Bare(_)));
    }
}
