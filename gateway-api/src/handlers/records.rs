use axum::{extract::State, Json};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use gateway_common::record::{Payload, StreamRecord};

use super::app::AppState;
use crate::api::{
    ApiError, BatchEntry, BatchRecordResult, PublishBatchRequest, PublishBatchResponse,
    PublishRequest, PublishResponse,
};
use crate::time::TimeSource;

const TIMESTAMP_FIELD: &str = "timestamp";

/// Add a `timestamp` field to object payloads that lack one. Other payloads are left as is.
fn stamp(mut data: Payload, timesource: &dyn TimeSource) -> Result<Payload, ApiError> {
    if let Value::Object(fields) = &mut data {
        if !fields.contains_key(TIMESTAMP_FIELD) {
            let now = timesource.current_time().format(&Rfc3339)?;
            fields.insert(TIMESTAMP_FIELD.to_owned(), Value::String(now));
        }
    }

    Ok(data)
}

pub async fn publish(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let data = stamp(request.data, state.timesource.as_ref())?;
    let record = StreamRecord::new(request.partition_key, data);

    let sequence_number = state.publisher.publish(record).await?;
    debug!(sequence_number = %sequence_number, "record accepted");

    Ok(Json(PublishResponse {
        success: true,
        sequence_number,
    }))
}

pub async fn publish_batch(
    State(state): State<AppState>,
    Json(request): Json<PublishBatchRequest>,
) -> Result<Json<PublishBatchResponse>, ApiError> {
    let PublishBatchRequest {
        partition_key,
        records,
    } = request;

    let records = records
        .into_iter()
        .map(|entry| match entry {
            BatchEntry::Keyed {
                partition_key,
                data,
            } => StreamRecord::new(partition_key, data),
            BatchEntry::Bare(data) => StreamRecord::new(partition_key.clone(), data),
        })
        .collect();

    let results = state.publisher.publish_batch(records).await?;

    let records: Vec<BatchRecordResult> = results.into_iter().map(Into::into).collect();
    let failed_record_count = records
        .iter()
        .filter(|result| matches!(result, BatchRecordResult::Failed { .. }))
        .count();

    Ok(Json(PublishBatchResponse {
        records,
        failed_record_count,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_json_diff::assert_json_include;
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use time::macros::datetime;
    use tower::ServiceExt; // for `oneshot`

    use gateway_common::publisher::StreamPublisher;
    use gateway_common::record::SequenceToken;
    use gateway_common::transport::local::LocalTransport;

    use crate::handlers::add_routes;
    use crate::time::FixedTime;

    fn app(max_batch_records: usize) -> (Router, Arc<LocalTransport>) {
        let transport = Arc::new(LocalTransport::new("api-test", 2));
        let publisher = StreamPublisher::new(transport.clone(), max_batch_records);
        let timesource = FixedTime {
            time: datetime!(2024-05-01 12:30:00 UTC),
        };

        (add_routes(Router::new(), publisher, timesource), transport)
    }

    async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri(uri)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn publish_stamps_and_returns_token() {
        let (app, transport) = app(500);

        let (status, body) = post(
            app,
            "/records",
            json!({"partition_key": "shard-1", "data": {"value": 42}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));

        let token = SequenceToken::new(body["sequence_number"].as_str().unwrap());
        let stored = transport.lookup(&token).unwrap();
        assert_eq!(stored.partition_key.as_deref(), Some("shard-1"));

        let payload: Value = serde_json::from_slice(&stored.data).unwrap();
        assert_eq!(
            payload,
            json!({"value": 42, "timestamp": "2024-05-01T12:30:00Z"})
        );
    }

    #[tokio::test]
    async fn publish_keeps_existing_timestamp_and_defaults_key() {
        let (app, transport) = app(500);

        let (status, body) = post(
            app,
            "/records",
            json!({"data": {"value": 1, "timestamp": "yesterday"}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let token = SequenceToken::new(body["sequence_number"].as_str().unwrap());
        let stored = transport.lookup(&token).unwrap();
        assert_eq!(stored.partition_key.as_deref(), Some("default"));

        let payload: Value = serde_json::from_slice(&stored.data).unwrap();
        assert_eq!(payload["timestamp"], json!("yesterday"));
    }

    #[tokio::test]
    async fn publish_batch_is_positional() {
        let (app, transport) = app(500);

        let (status, body) = post(
            app,
            "/records/batch",
            json!({
                "partition_key": "shard-1",
                "records": [
                    {"value": 1},
                    {"partition_key": "shard-2", "data": {"value": 2}},
                ]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_json_include!(actual: body, expected: json!({"failed_record_count": 0}));

        let keys: Vec<_> = body["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|record| {
                let token = SequenceToken::new(record["sequence_number"].as_str().unwrap());
                transport.lookup(&token).unwrap().partition_key.unwrap()
            })
            .collect();
        assert_eq!(keys, vec!["shard-1", "shard-2"]);
    }

    #[tokio::test]
    async fn publish_batch_over_limit_is_rejected() {
        let (app, transport) = app(2);

        let (status, body) = post(
            app,
            "/records/batch",
            json!({"records": [{"value": 1}, {"value": 2}, {"value": 3}]}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("rejected"));
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn publish_batch_empty() {
        let (app, _) = app(500);

        let (status, body) = post(app, "/records/batch", json!({"records": []})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"records": [], "failed_record_count": 0}));
    }

    #[tokio::test]
    async fn publish_missing_data() {
        let (app, _) = app(500);

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/records")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"partition_key": "k"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
