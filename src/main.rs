//! Proxy Relay - Entry Point
//!
//! Binds a free local port, prints it, and forwards connections to the
//! upstream pool until interrupted.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxy_relay::config::{Config, LogConfig};
use proxy_relay::proxy::{ProxySelector, RelayServer, StickySelector};

#[tokio::main(flavor = "current_thread")]
async fn main() -> proxy_relay::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting proxy relay");

    let selector = StickySelector::with_upstreams(config.relay.upstreams.clone()).await?;
    info!("Loaded {} upstreams", selector.available_count());
    if let Some(upstream) = selector.pinned() {
        info!("Forwarding through upstream {}", upstream);
    }

    let server = RelayServer::bind(&config.relay, selector).await?;
    let session = server.session();

    // The bound address is the one line written to stdout.
    println!("{}", server.local_addr());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = server.run(shutdown_rx);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            run.await
        }
    };

    match serde_json::to_string(&session.summary()) {
        Ok(summary) => info!(summary = %summary, "Proxy relay stopped"),
        Err(e) => warn!("Failed to serialize session summary: {}", e),
    }

    if let Err(e) = &result {
        error!("Proxy relay failed: {}", e);
    }
    result
}

/// Initialize tracing; logs go to stderr so stdout only carries the address
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_relay={}", log.level).into());

    let (json, pretty) = if log.format.eq_ignore_ascii_case("json") {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
