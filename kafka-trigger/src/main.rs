use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kafka_trigger::config::Config;
use kafka_trigger::dispatch::LoggingExecutor;
use kafka_trigger::kafka::{BrokerClient, RdKafkaClient};
use kafka_trigger::listener::KafkaListener;
use kafka_trigger::scaler::{
    MetricsProvider, ScaleMonitor, ScalerRegistry, TargetScaler, TopicScaler,
};
use kafka_trigger::server::{router, serve, setup_metrics_routes, AppState};

fn start_server(config: &Config, state: AppState) -> Result<JoinHandle<()>> {
    let router = setup_metrics_routes(router(state))?;
    let bind = config.bind_address();

    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("HTTP server failed: {e:#}");
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Kafka trigger");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded: {:?}", config);

    let client: Arc<dyn BrokerClient> = Arc::new(
        RdKafkaClient::new(&config.consumer_config(), &config.kafka_topic)
            .context("Failed to create Kafka client")?,
    );

    let provider = Arc::new(MetricsProvider::new(
        &config.kafka_topic,
        &config.kafka_consumer_group,
        client.clone(),
        config.metadata_timeout(),
        config.metadata_refresh_interval(),
    ));
    let monitor = Arc::new(ScaleMonitor::new(
        &config.function_id,
        &config.kafka_consumer_group,
        TopicScaler::new(
            &config.kafka_topic,
            &config.kafka_consumer_group,
            config.lag_threshold,
        ),
        provider.clone(),
    ));
    let target_scaler = Arc::new(
        TargetScaler::new(config.scaler_key(), config.lag_threshold, provider)
            .with_metrics_freshness(config.metrics_freshness())
            .with_scale_down_throttle(config.scale_down_throttle()),
    );
    let ready = Arc::new(AtomicBool::new(false));

    let server_handle = start_server(
        &config,
        AppState {
            monitor,
            target_scaler,
            registry: Arc::new(ScalerRegistry::new()),
            ready: ready.clone(),
        },
    )?;
    info!("Started HTTP server on {}", config.bind_address());

    let mut listener = KafkaListener::new(
        config.to_listener_config()?,
        client,
        Arc::new(LoggingExecutor),
    );
    listener.start().context("Failed to start listener")?;
    ready.store(true, Ordering::SeqCst);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    ready.store(false, Ordering::SeqCst);

    if !listener.stop(config.shutdown_timeout()).await {
        warn!("Listener did not drain within the shutdown timeout");
    }

    server_handle.abort();
    info!("Kafka trigger stopped");

    Ok(())
}
