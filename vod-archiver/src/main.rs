use tracing::{error, info};
use vod_archiver::config::ArchiverConfig;
use vod_archiver::logging;
use vod_archiver::services::ServiceContainer;
use vod_archiver::utils::http_client::install_rustls_provider;
use vod_archiver::utils::signal::wait_for_shutdown_signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ArchiverConfig::from_env()?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;
    install_rustls_provider();

    info!(
        channel = %config.channel,
        max_concurrent = config.orchestrator.max_concurrent_downloads,
        publish = config.publish.is_some(),
        "Starting vod-archiver {}",
        env!("CARGO_PKG_VERSION")
    );

    let container = match ServiceContainer::new(config).await {
        Ok(container) => container,
        Err(e) => {
            error!(error = %e, "Failed to initialize services");
            return Err(e.into());
        }
    };
    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start();

    let signal = wait_for_shutdown_signal().await;
    info!(signal, "Received shutdown signal");
    container.shutdown().await;

    info!("vod-archiver stopped");
    Ok(())
}
