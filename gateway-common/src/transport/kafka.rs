use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Message};
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::error::{PublishError, TransportError};
use crate::record::{
    DataEncoding, DispatchBatch, EncodedRecord, RawRecord, SequenceToken, StreamDescription,
    StreamStatus,
};
use crate::transport::StreamTransport;

/// How long a poll waits for the first record before returning an empty batch.
const FIRST_RECORD_WAIT: Duration = Duration::from_millis(500);
/// Once a record arrived, how long a poll keeps collecting further ready records.
const DRAIN_WAIT: Duration = Duration::from_millis(10);

struct TopicSummary {
    partitions: usize,
    healthy: bool,
}

pub struct KafkaContext;

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("gateway_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("gateway_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("gateway_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "gateway_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            counter!(
                "gateway_kafka_broker_tx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.txerrs);
        }
    }
}

/// Transport backed by a Kafka topic: one producer for writes, and, for workers, one
/// consumer in a consumer group for pull delivery.
///
/// Offsets are stored only once the worker acknowledges a record, and the stored offsets
/// are committed in the background. A crash between poll and acknowledgment replays those
/// records to the next member of the group.
pub struct KafkaTransport {
    producer: FutureProducer<KafkaContext>,
    consumer: Option<StreamConsumer>,
    topic: String,
    metadata_timeout: Duration,
}

impl KafkaTransport {
    pub fn new(
        config: &KafkaConfig,
        topic: &str,
        consumer: Option<&ConsumerConfig>,
    ) -> Result<KafkaTransport, TransportError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext)?;

        // Ping the cluster to make sure we can reach brokers before accepting traffic
        drop(
            producer
                .client()
                .fetch_metadata(Some(topic), config.metadata_timeout())?,
        );
        info!("connected to Kafka brokers");

        let consumer = consumer
            .map(|consumer_config| Self::create_consumer(config, consumer_config, topic))
            .transpose()?;

        Ok(KafkaTransport {
            producer,
            consumer,
            topic: topic.to_owned(),
            metadata_timeout: config.metadata_timeout(),
        })
    }

    fn create_consumer(
        config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topic: &str,
    ) -> Result<StreamConsumer, TransportError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;
        info!(
            group = %consumer_config.kafka_consumer_group,
            "subscribed to topic {}", topic
        );

        Ok(consumer)
    }

    /// Ask the brokers about our topic. `None` means the cluster answered but does not know it.
    async fn fetch_topic(&self) -> Result<Option<TopicSummary>, TransportError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        // fetch_metadata blocks the calling thread until brokers answer or the timeout hits
        tokio::task::spawn_blocking(move || {
            let metadata = producer.client().fetch_metadata(Some(&topic), timeout)?;
            let summary = metadata
                .topics()
                .iter()
                .find(|found| found.name() == topic)
                .map(|found| {
                    if let Some(err) = found.error() {
                        warn!("topic {} reports error {:?}", topic, err);
                    }
                    TopicSummary {
                        partitions: found.partitions().len(),
                        healthy: found.error().is_none(),
                    }
                });
            Ok::<_, KafkaError>(summary)
        })
        .await
        .map_err(|e| TransportError::Unavailable(format!("metadata request aborted: {e}")))?
        .map_err(TransportError::from)
    }

    fn enqueue(&self, record: &EncodedRecord) -> Result<DeliveryFuture, PublishError> {
        match self.producer.send_result(FutureRecord {
            topic: self.topic.as_str(),
            payload: Some(record.data.as_slice()),
            partition: None,
            key: Some(record.partition_key.as_str()),
            timestamp: None,
            headers: None,
        }) {
            Ok(ack) => Ok(ack),
            Err((e, _)) => Err(publish_error(e)),
        }
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<SequenceToken, PublishError> {
        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while librdkafka was still delivering
                error!("failed to produce to Kafka before write timeout");
                Err(PublishError::TransportUnavailable(
                    "delivery timed out before acknowledgment".to_owned(),
                ))
            }
            Ok(Err((err, _))) => Err(publish_error(err)),
            Ok(Ok((partition, offset))) => Ok(SequenceToken::new(format!("{partition}-{offset}"))),
        }
    }
}

/// Split a polled record id back into its partition and offset.
fn parse_record_id(record_id: &str) -> Option<(i32, i64)> {
    let (partition, offset) = record_id.split_once('-')?;
    Some((partition.parse().ok()?, offset.parse().ok()?))
}

fn publish_error(error: KafkaError) -> PublishError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageSizeTooLarge)
        | Some(RDKafkaErrorCode::InvalidMessageSize)
        | Some(RDKafkaErrorCode::InvalidMessage) => {
            counter!("gateway_kafka_records_rejected_total").increment(1);
            PublishError::Rejected(error.to_string())
        }
        _ => {
            counter!("gateway_kafka_produce_errors_total").increment(1);
            error!("failed to produce to Kafka: {}", error);
            PublishError::TransportUnavailable(error.to_string())
        }
    }
}

#[async_trait]
impl StreamTransport for KafkaTransport {
    async fn put(&self, record: EncodedRecord) -> Result<SequenceToken, PublishError> {
        let ack = self.enqueue(&record)?;
        Self::process_ack(ack).await
    }

    async fn put_batch(
        &self,
        records: Vec<EncodedRecord>,
    ) -> Result<Vec<Result<SequenceToken, PublishError>>, PublishError> {
        // Kafka has no single batch write: an unreachable cluster is the one failure that
        // covers the whole batch, so check for it before queueing anything.
        self.fetch_topic()
            .await
            .map_err(|e| PublishError::TransportUnavailable(e.to_string()))?;

        histogram!("gateway_kafka_batch_size").record(records.len() as f64);

        // Queue records sequentially to keep their order in the producer queue, then wait
        // for the broker acknowledgments concurrently.
        let pending: Vec<_> = records.iter().map(|record| self.enqueue(record)).collect();
        let results = join_all(pending.into_iter().map(|queued| async move {
            match queued {
                Ok(ack) => Self::process_ack(ack).await,
                Err(err) => Err(err),
            }
        }))
        .await;

        Ok(results)
    }

    async fn describe(&self) -> Result<StreamDescription, TransportError> {
        let (shard_count, status) = match self.fetch_topic().await? {
            Some(TopicSummary {
                partitions,
                healthy: true,
            }) => (partitions, StreamStatus::Active),
            Some(TopicSummary { partitions, .. }) => (partitions, StreamStatus::Unknown),
            None => (0, StreamStatus::Unknown),
        };

        Ok(StreamDescription {
            name: self.topic.clone(),
            shard_count,
            status,
            retention_hours: None,
            local_mode: false,
        })
    }

    async fn poll(&self, max_records: usize) -> Result<DispatchBatch, TransportError> {
        let Some(consumer) = &self.consumer else {
            return Err(TransportError::Configuration(
                "transport was created without a consumer".to_owned(),
            ));
        };

        let mut records = Vec::new();
        while records.len() < max_records {
            let wait = if records.is_empty() {
                FIRST_RECORD_WAIT
            } else {
                DRAIN_WAIT
            };

            let message = match tokio::time::timeout(wait, consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(message)) => message,
                Ok(Err(err)) if records.is_empty() => return Err(err.into()),
                Ok(Err(err)) => {
                    // Hand out what we already have, the error will surface again next poll
                    warn!("Kafka consumer error after partial poll: {}", err);
                    break;
                }
            };

            records.push(RawRecord {
                record_id: format!("{}-{}", message.partition(), message.offset()),
                partition_key: message
                    .key()
                    .map(|key| String::from_utf8_lossy(key).into_owned()),
                data: message.payload().unwrap_or_default().to_vec(),
                encoding: DataEncoding::Json,
            });
        }

        Ok(DispatchBatch::new(records))
    }

    async fn acknowledge(&self, record_ids: &[String]) -> Result<(), TransportError> {
        let Some(consumer) = &self.consumer else {
            return Ok(());
        };

        for record_id in record_ids {
            let Some((partition, offset)) = parse_record_id(record_id) else {
                warn!("cannot store offset for unexpected record id {}", record_id);
                continue;
            };
            // Kafka expects the offset of the next record to read
            consumer.store_offset(&self.topic, partition, offset + 1)?;
        }

        Ok(())
    }

    async fn release(&self, record_ids: &[String]) -> Result<(), TransportError> {
        // Their offsets are never stored, so the group reads them again after the next
        // rebalance or restart.
        debug!(released = record_ids.len(), "leaving Kafka offsets unstored");
        Ok(())
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        let flushed =
            tokio::task::spawn_blocking(move || producer.flush(Duration::new(30, 0))).await;

        match flushed {
            Ok(Ok(())) => info!("flushed Kafka producer queue"),
            Ok(Err(err)) => error!("failed to flush Kafka producer queue: {}", err),
            Err(err) => error!("Kafka flush task failed: {}", err),
        }
    }
}
