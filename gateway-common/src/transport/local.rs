use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::debug;

use crate::error::{PublishError, TransportError};
use crate::record::{
    DataEncoding, DispatchBatch, EncodedRecord, RawRecord, SequenceToken, StreamDescription,
    StreamStatus,
};
use crate::transport::StreamTransport;

/// Shared by every `LocalTransport` so tokens stay unique for the whole process run.
static LOCAL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const LOCAL_RETENTION_HOURS: u32 = 24;

fn next_token() -> SequenceToken {
    let sequence = LOCAL_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    SequenceToken::new(format!("LOCAL-{sequence:020}"))
}

#[derive(Default)]
struct LocalLog {
    records: Vec<RawRecord>,
    /// Index of the first record not yet handed out by `poll`.
    delivered: usize,
}

/// In-process stand-in for the stream service, for environments without one.
///
/// Every write succeeds. Records are kept in an append-only log and handed out by `poll`
/// in publish order, so a local worker can consume what a local publisher wrote.
/// Nothing is evicted: this is meant for development runs, not long-lived processes.
pub struct LocalTransport {
    name: String,
    shard_count: usize,
    log: Mutex<LocalLog>,
}

impl LocalTransport {
    pub fn new(name: &str, shard_count: usize) -> Self {
        Self {
            name: name.to_owned(),
            shard_count,
            log: Mutex::new(LocalLog::default()),
        }
    }

    fn log(&self) -> MutexGuard<'_, LocalLog> {
        // A panic while holding the lock cannot leave the log half-written, keep going.
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, log: &mut LocalLog, record: EncodedRecord) -> SequenceToken {
        let token = next_token();
        debug!(token = %token, partition_key = %record.partition_key, "local record appended");

        log.records.push(RawRecord {
            record_id: token.to_string(),
            partition_key: Some(record.partition_key),
            data: record.data,
            encoding: DataEncoding::Json,
        });

        token
    }

    /// Find a previously written record by the token its write returned.
    pub fn lookup(&self, token: &SequenceToken) -> Option<RawRecord> {
        self.log()
            .records
            .iter()
            .find(|record| record.record_id == token.as_str())
            .cloned()
    }

    /// Number of written records not yet handed out by `poll`.
    pub fn pending(&self) -> usize {
        let log = self.log();
        log.records.len() - log.delivered
    }
}

#[async_trait]
impl StreamTransport for LocalTransport {
    async fn put(&self, record: EncodedRecord) -> Result<SequenceToken, PublishError> {
        let token = {
            let mut log = self.log();
            self.append(&mut log, record)
        };
        counter!("gateway_local_records_total").increment(1);

        Ok(token)
    }

    async fn put_batch(
        &self,
        records: Vec<EncodedRecord>,
    ) -> Result<Vec<Result<SequenceToken, PublishError>>, PublishError> {
        histogram!("gateway_local_batch_size").record(records.len() as f64);
        counter!("gateway_local_records_total").increment(records.len() as u64);

        let mut log = self.log();
        Ok(records
            .into_iter()
            .map(|record| Ok(self.append(&mut log, record)))
            .collect())
    }

    async fn describe(&self) -> Result<StreamDescription, TransportError> {
        Ok(StreamDescription {
            name: self.name.clone(),
            shard_count: self.shard_count,
            status: StreamStatus::Active,
            retention_hours: Some(LOCAL_RETENTION_HOURS),
            local_mode: true,
        })
    }

    async fn poll(&self, max_records: usize) -> Result<DispatchBatch, TransportError> {
        let mut log = self.log();
        let start = log.delivered;
        let end = log.records.len().min(start.saturating_add(max_records));
        log.delivered = end;

        Ok(log.records[start..end].iter().cloned().collect())
    }

    /// Rewind delivery to the earliest released record. Anything handed out after it is
    /// delivered again too, which is exact when a single worker polls this transport.
    async fn release(&self, record_ids: &[String]) -> Result<(), TransportError> {
        let mut log = self.log();
        let delivered = log.delivered;
        if let Some(first) = log.records[..delivered]
            .iter()
            .position(|record| record_ids.contains(&record.record_id))
        {
            debug!(
                released = delivered - first,
                "local records returned for redelivery"
            );
            log.delivered = first;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn record(key: &str, data: &str) -> EncodedRecord {
        EncodedRecord {
            partition_key: key.to_owned(),
            data: data.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_tokens_are_unique_and_resolvable() {
        let transport = LocalTransport::new("local-stream", 2);
        let other = LocalTransport::new("other-stream", 1);
        let mut seen = HashSet::new();

        for i in 0..50 {
            let token = transport
                .put(record("shard-1", &format!("{{\"value\":{i}}}")))
                .await
                .expect("local put never fails");
            assert!(!token.as_str().is_empty());
            assert!(seen.insert(token.clone()), "duplicate token {token}");

            let stored = transport.lookup(&token).expect("token must resolve");
            assert_eq!(stored.record_id, token.as_str());
            assert_eq!(stored.partition_key.as_deref(), Some("shard-1"));
        }

        // A second transport in the same process never reissues a token.
        let token = other.put(record("k", "{}")).await.unwrap();
        assert!(seen.insert(token));
    }

    #[tokio::test]
    async fn test_put_batch_is_positional() {
        let transport = LocalTransport::new("local-stream", 2);
        let results = transport
            .put_batch(vec![record("a", "1"), record("b", "2"), record("c", "3")])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for (result, key) in results.iter().zip(["a", "b", "c"]) {
            let token = result.as_ref().unwrap();
            assert_eq!(
                transport.lookup(token).unwrap().partition_key.as_deref(),
                Some(key)
            );
        }
    }

    #[tokio::test]
    async fn test_poll_hands_out_records_once_in_order() {
        let transport = LocalTransport::new("local-stream", 2);
        for i in 0..5 {
            transport.put(record("k", &i.to_string())).await.unwrap();
        }
        assert_eq!(transport.pending(), 5);

        let first = transport.poll(3).await.unwrap();
        let data: Vec<_> = first.records().iter().map(|r| r.data.clone()).collect();
        assert_eq!(data, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);

        let second = transport.poll(10).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(transport.poll(10).await.unwrap().is_empty());
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn test_released_records_are_polled_again() {
        let transport = LocalTransport::new("local-stream", 2);
        for i in 0..4 {
            transport.put(record("k", &i.to_string())).await.unwrap();
        }

        let batch = transport.poll(10).await.unwrap();
        let ids: Vec<String> = batch.records().iter().map(|r| r.record_id.clone()).collect();
        transport.acknowledge(&ids[..2]).await.unwrap();
        transport.release(&ids[2..]).await.unwrap();
        assert_eq!(transport.pending(), 2);

        let again = transport.poll(10).await.unwrap();
        let again_ids: Vec<String> = again.records().iter().map(|r| r.record_id.clone()).collect();
        assert_eq!(again_ids, ids[2..].to_vec());

        // Unknown ids leave delivery where it is.
        transport.release(&["LOCAL-unknown".to_owned()]).await.unwrap();
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn test_describe_reports_local_stream() {
        let transport = LocalTransport::new("realtime-data-stream", 2);
        let description = transport.describe().await.unwrap();

        assert_eq!(description.name, "realtime-data-stream");
        assert_eq!(description.shard_count, 2);
        assert_eq!(description.status, StreamStatus::Active);
        assert!(description.local_mode);
    }
}
