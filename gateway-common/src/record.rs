use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured record content. Opaque to the publisher; handlers own its schema.
pub type Payload = serde_json::Value;

/// An acknowledgment for a successful write, issued by the transport.
///
/// Kafka tokens look like `"{partition}-{offset}"`, local tokens like `"LOCAL-00000000000000000001"`.
/// Callers must treat both as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record built by a producer. Handed to the publisher by value: once a token
/// is issued nothing keeps a reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub partition_key: String,
    pub payload: Payload,
}

impl StreamRecord {
    pub fn new(partition_key: impl Into<String>, payload: Payload) -> Self {
        Self {
            partition_key: partition_key.into(),
            payload,
        }
    }
}

/// A record after encoding, as handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// How the bytes of a `RawRecord` must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataEncoding {
    /// Plain JSON bytes, as pulled from the transport.
    #[default]
    Json,
    /// Base64 text wrapping JSON bytes, as pushed by stream triggers.
    Base64Json,
}

/// A record as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_id: String,
    pub partition_key: Option<String>,
    pub data: Vec<u8>,
    pub encoding: DataEncoding,
}

impl RawRecord {
    pub fn json(record_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            record_id: record_id.into(),
            partition_key: None,
            data: data.into(),
            encoding: DataEncoding::Json,
        }
    }
}

/// An ordered group of raw records, in transport delivery order.
/// Built for one dispatch cycle and consumed by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchBatch {
    records: Vec<RawRecord>,
}

impl DispatchBatch {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }
}

impl IntoIterator for DispatchBatch {
    type Item = RawRecord;
    type IntoIter = std::vec::IntoIter<RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<RawRecord> for DispatchBatch {
    fn from_iter<I: IntoIterator<Item = RawRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Creating,
    Active,
    Updating,
    Unknown,
}

/// What the transport reports about the stream it writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub name: String,
    pub shard_count: usize,
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_hours: Option<u32>,
    pub local_mode: bool,
}
