use std::sync::Arc;

use axum::{routing, Router};
use tower_http::trace::TraceLayer;

use gateway_common::publisher::StreamPublisher;

use super::{records, stream};
use crate::time::TimeSource;

#[derive(Clone)]
pub struct AppState {
    pub publisher: StreamPublisher,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
}

pub fn add_routes<TZ: TimeSource + Send + Sync + 'static>(
    router: Router,
    publisher: StreamPublisher,
    timesource: TZ,
) -> Router {
    let state = AppState {
        publisher,
        timesource: Arc::new(timesource),
    };

    let routes = Router::new()
        .route("/", routing::get(index))
        .route("/records", routing::post(records::publish))
        .route("/records/batch", routing::post(records::publish_batch))
        .route("/stream", routing::get(stream::describe))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    router.merge(routes)
}

pub async fn index() -> &'static str {
    "gateway api"
}
