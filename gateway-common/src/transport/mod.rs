use async_trait::async_trait;

use crate::error::{PublishError, TransportError};
use crate::record::{DispatchBatch, EncodedRecord, SequenceToken, StreamDescription};

pub mod kafka;
pub mod local;

/// The stream service the gateway writes to and reads from.
///
/// A transport is acquired once at startup and shared by every publisher and worker for
/// the life of the process. Implementations must be safe to call concurrently without
/// extra locking on the caller side.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Write one record, returning the token acknowledging it.
    async fn put(&self, record: EncodedRecord) -> Result<SequenceToken, PublishError>;

    /// Write many records in one call.
    ///
    /// The inner vector is positionally aligned with `records`. The outer error means the
    /// call as a whole failed and no record can be assumed written.
    async fn put_batch(
        &self,
        records: Vec<EncodedRecord>,
    ) -> Result<Vec<Result<SequenceToken, PublishError>>, PublishError>;

    async fn describe(&self) -> Result<StreamDescription, TransportError>;

    /// Pull up to `max_records` records, in delivery order. An empty batch means nothing
    /// was available.
    async fn poll(&self, max_records: usize) -> Result<DispatchBatch, TransportError>;

    /// Mark polled records as done, so a restarted consumer does not receive them again.
    /// Records that were started count as done whether they succeeded or failed.
    async fn acknowledge(&self, _record_ids: &[String]) -> Result<(), TransportError> {
        Ok(())
    }

    /// Hand polled records that were never started back to the stream, so they are
    /// delivered again.
    async fn release(&self, _record_ids: &[String]) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the transport at shutdown, delivering anything still queued.
    async fn close(&self) {}
}
