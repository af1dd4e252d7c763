use anyhow::Result;
use axum::serve;
use fluxgate_core::config::{AppConfig, LoggingConfig};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::{create_app, init_services};
use std::net::SocketAddr;
use tokio::{signal, sync::broadcast};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Seconds background tasks get to stop after the listener has shut down.
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// `RUST_LOG` wins; otherwise `logging.level` applies to the workspace crates and `warn`
/// to everything else.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.level;
        EnvFilter::new(format!("warn,fluxgate_core={level},server={level},fluxgate={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

    init_logging(&config.logging);
    info!(
        environment = %config.environment,
        backend = config.nodes.backend.as_str(),
        "starting fluxgate"
    );
    debug!(
        default_nodes = config.nodes.groups.get("default").map_or(0, Vec::len),
        rate_limit = config.rate_limit.enabled,
        relay = config.relay.enabled,
        "configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let services = init_services(&config, &shutdown_tx)?;
    let routing = services.state.routing.clone();

    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!("{e}"))?;
    let app = create_app(services.state, &config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "json-rpc server listening");

    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error occurred");
    }

    let _ = shutdown_tx.send(());
    let background = futures_util::future::join_all(services.background);
    if tokio::time::timeout(
        std::time::Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS),
        background,
    )
    .await
    .is_err()
    {
        error!("background tasks did not stop in time");
    }

    routing.provider().close();
    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT_SECS, "shutdown signal received");
}
