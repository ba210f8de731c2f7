use serde::Serialize;
use thiserror::Error;

/// Enumeration of errors raised while turning records into bytes and back.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("record body is empty")]
    Empty,
    #[error("record body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Enumeration of errors returned to publishers. Never retried here: the caller decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("stream transport is unavailable: {0}")]
    TransportUnavailable(String),
    #[error("record was rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    TransportUnavailable,
    Rejected,
}

impl PublishError {
    pub fn kind(&self) -> PublishErrorKind {
        match self {
            PublishError::TransportUnavailable(_) => PublishErrorKind::TransportUnavailable,
            PublishError::Rejected(_) => PublishErrorKind::Rejected,
        }
    }
}

impl PublishErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishErrorKind::TransportUnavailable => "transport_unavailable",
            PublishErrorKind::Rejected => "rejected",
        }
    }
}

/// Enumeration of errors on the non-publish transport calls: connect, describe and poll.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("stream transport is unavailable: {0}")]
    Unavailable(String),
    #[error("stream transport is misconfigured: {0}")]
    Configuration(String),
}

impl From<rdkafka::error::KafkaError> for TransportError {
    fn from(error: rdkafka::error::KafkaError) -> Self {
        TransportError::Unavailable(error.to_string())
    }
}
