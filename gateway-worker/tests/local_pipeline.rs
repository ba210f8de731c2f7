use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use gateway_common::mode::{connect, StreamConfig};
use gateway_common::publisher::StreamPublisher;
use gateway_common::record::StreamRecord;
use gateway_worker::dispatcher::Dispatcher;
use gateway_worker::error::{FailureKind, HandlerError};
use gateway_worker::handlers::register_defaults;
use gateway_worker::registry::HandlerRegistry;
use gateway_worker::sink::{MemorySinkStore, SinkWriter};

#[tokio::test]
async fn published_records_reach_the_sink() {
    let config = StreamConfig::local("pipeline-test");
    let transport = connect(&config, None).expect("local mode always connects");
    let publisher = StreamPublisher::new(transport.clone(), config.max_batch_records);

    let results = publisher
        .publish_batch(vec![
            StreamRecord::new("shard-1", json!({"value": 42})),
            StreamRecord::new("shard-2", json!({"category": "sensor", "value": 250})),
            StreamRecord::new("shard-1", json!({"category": "billing", "amount": 3})),
        ])
        .await
        .expect("local batch publish never fails");
    let tokens: Vec<_> = results
        .into_iter()
        .map(|result| result.expect("local records are never rejected"))
        .collect();

    let registry = Arc::new(HandlerRegistry::new());
    register_defaults(&registry);
    let store = Arc::new(MemorySinkStore::new());
    let dispatcher = Dispatcher::new(registry, SinkWriter::new(store.clone()));

    let batch = transport.poll(10).await.unwrap();
    assert_eq!(batch.len(), 3);

    let result = dispatcher.dispatch(batch, &CancellationToken::new()).await;

    assert_eq!(result.processed, 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].record_id, tokens[2].as_str());
    assert_eq!(result.failures[0].kind, FailureKind::NoHandlerError);

    let reading = store.get(tokens[0].as_str()).unwrap();
    assert_eq!(reading["processed"], json!(true));
    assert!(reading.get("alert").is_none());

    let sensor = store.get(tokens[1].as_str()).unwrap();
    assert_eq!(sensor["alert"], json!("HIGH_VALUE_ALERT"));

    // Nothing is redelivered.
    assert!(transport.poll(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn handlers_registered_later_apply_to_later_batches() {
    let config = StreamConfig::local("pipeline-registration-test");
    let transport = connect(&config, None).unwrap();
    let publisher = StreamPublisher::new(transport.clone(), config.max_batch_records);

    let registry = Arc::new(HandlerRegistry::new());
    let store = Arc::new(MemorySinkStore::new());
    let dispatcher = Dispatcher::new(registry.clone(), SinkWriter::new(store.clone()));

    publisher
        .publish(StreamRecord::new("k", json!({"category": "billing"})))
        .await
        .unwrap();
    let first = dispatcher
        .dispatch(transport.poll(10).await.unwrap(), &CancellationToken::new())
        .await;
    assert_eq!(first.failures[0].kind, FailureKind::NoHandlerError);

    registry.register(
        "billing",
        |payload: &serde_json::Value| -> Result<serde_json::Value, HandlerError> {
            Ok(json!({ "billed": payload.clone() }))
        },
    );

    let token = publisher
        .publish(StreamRecord::new("k", json!({"category": "billing"})))
        .await
        .unwrap();
    let second = dispatcher
        .dispatch(transport.poll(10).await.unwrap(), &CancellationToken::new())
        .await;

    assert_eq!(second.processed, 1);
    assert_eq!(
        store.get(token.as_str()),
        Some(json!({"billed": {"category": "billing"}}))
    );
}

#[tokio::test]
async fn worker_stops_on_shutdown_with_an_idle_stream() {
    let config = StreamConfig::local("pipeline-idle-test");
    let transport = connect(&config, None).unwrap();

    let registry = Arc::new(HandlerRegistry::new());
    let dispatcher = Dispatcher::new(
        registry,
        SinkWriter::new(Arc::new(MemorySinkStore::new())),
    );
    let worker = gateway_worker::worker::StreamWorker::new(
        "idle",
        transport,
        dispatcher,
        Duration::from_millis(10),
        10,
    );

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stops promptly")
        .unwrap();
}
