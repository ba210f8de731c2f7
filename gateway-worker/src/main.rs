//! Consume stream records and run them through the registered handlers into the sink.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gateway_common::metrics::{serve, setup_metrics_routes};
use gateway_common::mode::connect;
use gateway_worker::config::{Config, SinkKind};
use gateway_worker::dispatcher::Dispatcher;
use gateway_worker::error::WorkerError;
use gateway_worker::handlers::register_defaults;
use gateway_worker::registry::HandlerRegistry;
use gateway_worker::router::add_routes;
use gateway_worker::sink::{MemorySinkStore, PgSinkStore, SinkStore, SinkWriter};
use gateway_worker::worker::StreamWorker;

async fn shutdown_signal() {
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

    info!("shutdown signal received");
}

async fn sink_store(config: &Config) -> Result<Arc<dyn SinkStore>, WorkerError> {
    Ok(match config.sink_kind {
        SinkKind::Memory => Arc::new(MemorySinkStore::new()),
        SinkKind::Postgres => Arc::new(
            PgSinkStore::new(&config.database_url, config.max_pg_connections).await?,
        ),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let transport = connect(&config.stream, Some(&config.consumer)).map_err(WorkerError::from)?;
    if config.stream.is_local_mode() {
        warn!("local stream is private to this process, feed it through POST /dispatch");
    }

    let registry = Arc::new(HandlerRegistry::new());
    register_defaults(&registry);
    let dispatcher = Dispatcher::new(registry, SinkWriter::new(sink_store(&config).await?));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let worker = StreamWorker::new(
        &config.worker_name,
        transport.clone(),
        dispatcher.clone(),
        config.poll_interval.0,
        config.max_records_per_poll,
    );
    let worker_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let app = add_routes(Router::new(), dispatcher, shutdown.clone());
    let app = setup_metrics_routes(app)?;

    let server_shutdown = shutdown.clone();
    let served = serve(app, &config.bind(), async move {
        server_shutdown.cancelled().await
    })
    .await;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!("stream worker task failed: {}", e);
    }
    transport.close().await;

    served.wrap_err("failed to serve gateway worker")
}
