//! Accept records over HTTP and publish them to the configured stream.
use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gateway_api::config::Config;
use gateway_api::handlers::add_routes;
use gateway_api::time::SystemTime;
use gateway_common::metrics::{serve, setup_metrics_routes};
use gateway_common::mode::connect;
use gateway_common::publisher::StreamPublisher;

async fn shutdown() {
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = term => {},
        _ = signal::ctrl_c() => {},
    };

    info!("shutting down gateway api");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let transport = connect(&config.stream, None)?;
    let publisher = StreamPublisher::new(transport.clone(), config.stream.max_batch_records);

    let app = add_routes(Router::new(), publisher, SystemTime {});
    let app = setup_metrics_routes(app)?;

    info!(bind = %config.bind(), "gateway api listening");
    let served = serve(app, &config.bind(), shutdown()).await;

    transport.close().await;

    served.wrap_err("failed to serve gateway api")
}
