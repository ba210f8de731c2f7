use gateway_common::error::{CodecError, TransportError};
use serde::Serialize;
use thiserror::Error;

use crate::registry::Category;

/// A failure reported by a processing handler, carrying the handler's own detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Enumeration of errors raised by sink stores.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("sink migrations failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("sink is unavailable: {0}")]
    Unavailable(String),
}

/// Enumeration of per-record failures during a dispatch cycle. None of them stop the batch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("record could not be decoded: {0}")]
    Decode(#[from] CodecError),
    #[error("no handler registered for category {0}")]
    NoHandler(Category),
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("result could not be written: {0}")]
    SinkWrite(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DecodeError,
    NoHandlerError,
    HandlerError,
    SinkWriteError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DecodeError => "decode_error",
            FailureKind::NoHandlerError => "no_handler_error",
            FailureKind::HandlerError => "handler_error",
            FailureKind::SinkWriteError => "sink_write_error",
        }
    }
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Decode(_) => FailureKind::DecodeError,
            DispatchError::NoHandler(_) => FailureKind::NoHandlerError,
            DispatchError::Handler(_) => FailureKind::HandlerError,
            DispatchError::SinkWrite(_) => FailureKind::SinkWriteError,
        }
    }
}

/// Enumeration of errors that stop the worker from starting or running.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("stream transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("sink store could not be initialized: {0}")]
    Sink(#[from] SinkError),
}
