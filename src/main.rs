mod app_config;
mod auth;
mod checkpoint;
mod email;
mod error;
mod poller;
mod prompt;
mod sheets;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_config::cfg;
use auth::SessionProvider;
use checkpoint::CheckpointStore;
use email::client::EmailClient;
use poller::SentMessagePoller;
use prompt::ExtractionClient;
use sheets::client::SheetsClient;
use sheets::tracker::TrackingSheet;

pub type HttpClient = reqwest::Client;

/// Every collaborator call gets a bounded timeout so a hung service
/// cannot stall the loop forever.
const HTTP_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    tracing::info!("Starting bookingclerk");
    println!("{}", *cfg);

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()?;

    let session = Arc::new(SessionProvider::new(http_client.clone()));

    // Fail fast: a dead refresh token or unreadable checkpoint should
    // stop the process, not spin an eternally failing loop.
    session
        .access_token()
        .await
        .map_err(|e| anyhow::anyhow!("startup credential refresh failed: {e}"))?;

    let email_client = EmailClient::new(http_client.clone(), session.clone());
    let extraction_client = ExtractionClient::new(http_client.clone());
    let sheet = TrackingSheet::new(SheetsClient::new(http_client, session));
    let checkpoint = CheckpointStore::new(&cfg.poll.checkpoint_path);

    let poller = SentMessagePoller::new(email_client, extraction_client, sheet, checkpoint)
        .map_err(|e| anyhow::anyhow!("startup failed: {e}"))?;

    let shutdown = CancellationToken::new();
    let poller_handle = tokio::spawn(poller.run(shutdown.clone()));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    poller_handle.await.context("poller task panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
