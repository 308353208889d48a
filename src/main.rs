mod aggregator;
mod config;
mod error;
mod fetch;
mod handler;
mod kafka_consumer;
mod object_store;
mod row_codec;

use aggregator::AggregateOptions;
use anyhow::{Context, Result};
use config::Config;
use handler::TriggerHandler;
use kafka_consumer::EventKafkaConsumer;
use object_store::S3ObjectStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting daily CSV aggregation service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(S3ObjectStore::new(&config.s3, config.retry_policy()).await);

    let options = AggregateOptions {
        fetch_concurrency: config.aggregation.fetch_concurrency,
        output_prefix: config.aggregation.output_prefix.clone(),
        content_type: config.aggregation.content_type.clone(),
    };
    let handler = Arc::new(TriggerHandler::new(store, options));

    let consumer = EventKafkaConsumer::new(&config.kafka, handler)
        .context("Failed to initialize Kafka consumer")?;

    // Spawn consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down");

    consumer_handle.abort();

    info!("Service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
