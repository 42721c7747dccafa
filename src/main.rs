use std::time::Duration;

use audio_relay::config::Config;
use audio_relay::process::probe_version;
use audio_relay::server::{router, AppState};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    report_dependencies(&config).await;

    let state = AppState::new(config.clone());
    let shutdown = CancellationToken::new();
    let sweeper = state
        .pipeline()
        .cache()
        .spawn_sweeper(config.cache_sweep_interval(), shutdown.clone());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(bind = %config.bind, "audio-relay listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    sweeper.await?;
    info!("audio-relay stopped");
    Ok(())
}

async fn report_dependencies(config: &Config) {
    let probe_deadline = Duration::from_secs(5);
    match probe_version(&config.extractor_path, "--version", probe_deadline).await {
        Some(version) => info!(%version, "extractor available"),
        None => warn!(
            path = %config.extractor_path.display(),
            "extractor not available, every request will fail"
        ),
    }
    match probe_version(&config.transcoder_path, "-version", probe_deadline).await {
        Some(version) => info!(%version, "transcoder available"),
        None => warn!(
            path = %config.transcoder_path.display(),
            "transcoder not available, filtered and seeked streams will fail"
        ),
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
