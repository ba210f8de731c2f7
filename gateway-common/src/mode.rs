//! Choosing between the real stream service and the in-process stand-in.
//!
//! The choice is made once, from configuration, when the process starts. The resulting
//! transport is handed to publishers and workers explicitly; nothing reads the mode later,
//! and a failing real transport never falls back to local mode.
use std::str::FromStr;
use std::sync::Arc;

use envconfig::Envconfig;
use tracing::{info, warn};

use crate::config::{ConsumerConfig, KafkaConfig, NonEmptyString};
use crate::error::TransportError;
use crate::transport::kafka::KafkaTransport;
use crate::transport::local::LocalTransport;
use crate::transport::StreamTransport;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransportMode {
    Kafka,
    Local,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "kafka" => Ok(TransportMode::Kafka),
            "local" => Ok(TransportMode::Local),
            _ => Err(format!("Unknown transport mode: {s}")),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct StreamConfig {
    #[envconfig(default = "kafka")]
    pub transport_mode: TransportMode,

    // The topic name in Kafka mode
    #[envconfig(default = "realtime-data-stream")]
    pub stream_name: NonEmptyString,

    #[envconfig(default = "2")]
    pub local_shard_count: usize,

    // Larger batches are rejected as a whole, mirroring managed stream limits
    #[envconfig(default = "500")]
    pub max_batch_records: usize,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl StreamConfig {
    pub fn is_local_mode(&self) -> bool {
        self.transport_mode == TransportMode::Local
    }

    /// A local-mode configuration, for tests and development tooling.
    pub fn local(stream_name: &str) -> Self {
        Self {
            transport_mode: TransportMode::Local,
            stream_name: NonEmptyString(stream_name.to_owned()),
            local_shard_count: 2,
            max_batch_records: 500,
            kafka: KafkaConfig {
                kafka_producer_linger_ms: 20,
                kafka_producer_queue_mib: 400,
                kafka_message_timeout_ms: 20000,
                kafka_metadata_timeout_ms: 5000,
                kafka_compression_codec: "none".to_owned(),
                kafka_tls: false,
                kafka_hosts: "localhost:9092".to_owned(),
            },
        }
    }
}

/// Acquire the transport selected by `config`. Pass a consumer configuration when the
/// caller needs pull delivery.
///
/// A local transport lives in this process only: its `poll` returns records written
/// through this same transport, never records published by another process.
pub fn connect(
    config: &StreamConfig,
    consumer: Option<&ConsumerConfig>,
) -> Result<Arc<dyn StreamTransport>, TransportError> {
    match config.transport_mode {
        TransportMode::Local => {
            warn!(
                stream = config.stream_name.as_str(),
                "running in local mode, records stay in this process"
            );
            Ok(Arc::new(LocalTransport::new(
                config.stream_name.as_str(),
                config.local_shard_count,
            )))
        }
        TransportMode::Kafka => {
            let transport =
                KafkaTransport::new(&config.kafka, config.stream_name.as_str(), consumer)?;
            info!(stream = config.stream_name.as_str(), "using Kafka transport");
            Ok(Arc::new(transport))
        }
    }
}
