use axum::{extract::State, routing, Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

use gateway_common::record::DispatchBatch;

use crate::delivery::{TriggerEnvelope, TriggerResponse};
use crate::dispatcher::Dispatcher;

#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

pub fn add_routes(router: Router, dispatcher: Dispatcher, shutdown: CancellationToken) -> Router {
    router
        .route("/", routing::get(index))
        .route(
            "/dispatch",
            routing::post(dispatch).with_state(AppState {
                dispatcher,
                shutdown,
            }),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "gateway worker"
}

/// Dispatch a batch pushed by a stream trigger. Record failures are reported in the body,
/// never as an error status.
async fn dispatch(
    State(state): State<AppState>,
    Json(envelope): Json<TriggerEnvelope>,
) -> Json<TriggerResponse> {
    debug!(records = envelope.records.len(), "received pushed batch");

    let batch = DispatchBatch::from(envelope);
    let result = state.dispatcher.dispatch(batch, &state.shutdown).await;

    Json(result.into())
}
