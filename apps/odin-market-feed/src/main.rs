//! ODIN Market Feed Demo
//!
//! Connects to the feed, subscribes LTP touchline for a list of scrips and
//! prints every decoded record as one JSON line until the run time elapses or
//! a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin odin-market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ODIN_HOST`: Feed server host
//! - `ODIN_PORT`: Feed server port
//! - `ODIN_USER_ID`: Account user id
//!
//! ## Optional
//! - `ODIN_API_KEY`: API key sent with the login
//! - `ODIN_USE_TLS`: Use `wss://` (default: false)
//! - `ODIN_COMPRESSION`: zlib-compress requests (default: true)
//! - `ODIN_SCRIPS`: Comma-separated `segment_token` list (default: 1_22,1_2885)
//! - `ODIN_RUN_SECS`: Seconds to stream before disconnecting (default: 60)
//! - `ODIN_METRICS_PORT`: Serve Prometheus metrics on this port (default: off)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use odin_market_feed::application::ports::{FeedEvent, FeedHandler, dispatch_events};
use odin_market_feed::domain::streaming::MarketRecord;
use odin_market_feed::domain::subscription::SubscriptionMode;
use odin_market_feed::infrastructure::odin::{FeedClient, WebSocketConnector};
use odin_market_feed::infrastructure::telemetry;
use odin_market_feed::{FeedConfig, FeedError, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ODIN market feed demo");

    let config = FeedConfig::from_env().context("invalid feed configuration")?;
    log_config(&config);

    let metrics_addr = (config.demo.metrics_port != 0)
        .then(|| SocketAddr::from(([0, 0, 0, 0], config.demo.metrics_port)));
    let _metrics_handle = init_metrics(metrics_addr).context("failed to start metrics")?;

    let (client, mut events) = FeedClient::connect(Arc::new(WebSocketConnector::new()), &config)?;
    let mut printer = JsonPrinter::default();

    match events.recv().await {
        Some(FeedEvent::Open) => printer.on_open(),
        first => {
            if let Some(event) = first {
                printer.handle(event);
            }
            dispatch_events(events, &mut printer).await;
            anyhow::bail!("feed session did not open");
        }
    }

    client
        .subscribe(&config.demo.scrips, SubscriptionMode::Ltp)
        .await
        .context("subscribe failed")?;
    tracing::info!(scrips = ?config.demo.scrips, "Subscribed LTP touchline");

    let consumer = tokio::spawn(async move {
        dispatch_events(events, &mut printer).await;
        printer
    });

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tokio::select! {
        () = shutdown_token.cancelled() => {}
        () = tokio::time::sleep(config.demo.run_for) => {
            tracing::info!(run_secs = config.demo.run_for.as_secs(), "Run time elapsed");
        }
    }

    client.disconnect().await;
    client.closed().await;

    let printer = consumer.await.context("event consumer failed")?;
    tracing::info!(
        records = printer.records,
        errors = printer.errors,
        "Feed demo finished"
    );

    Ok(())
}

/// Prints records as JSON lines and logs everything else.
#[derive(Debug, Default)]
struct JsonPrinter {
    records: u64,
    errors: u64,
}

impl JsonPrinter {
    fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Open => self.on_open(),
            FeedEvent::Message(record) => self.on_message(record),
            FeedEvent::Error(error) => self.on_error(error),
            FeedEvent::Close { code, reason } => self.on_close(code, reason),
        }
    }
}

impl FeedHandler for JsonPrinter {
    fn on_open(&mut self) {
        tracing::info!("Feed session open");
    }

    fn on_message(&mut self, record: MarketRecord) {
        self.records += 1;
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, kind = record.kind(), "Failed to serialize record"),
        }
    }

    fn on_error(&mut self, error: FeedError) {
        self.errors += 1;
        tracing::warn!(error = %error, kind = error.kind(), "Feed error");
    }

    fn on_close(&mut self, code: Option<u16>, reason: String) {
        tracing::info!(code = ?code, reason = %reason, "Feed session closed");
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        url = %config.endpoint.url(),
        user_id = config.credentials.user_id(),
        compression = config.session.compression.is_enabled(),
        scrips = config.demo.scrips.len(),
        run_secs = config.demo.run_for.as_secs(),
        metrics_port = config.demo.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        framing_policy = ?config.session.framing_policy,
        touchline = ?config.session.touchline,
        event_capacity = config.channels.event_capacity,
        "Session settings"
    );
}

/// Walk up from the current directory looking for a .env file.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, disconnecting");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, disconnecting");
        }
    }

    shutdown_token.cancel();
}
