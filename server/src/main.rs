//! Closeout HTTP server.

use anyhow::Context;
use closeout_core::closeout::Collaborators;
use closeout_core::environment::SystemClock;
use closeout_server::collaborators::{
    LinkStatementGenerator, PostgresAuthorizer, TracingEventEmitter, TracingNotifier,
};
use closeout_server::{build_router, metrics, AppState, Config, PostgresStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "closeout_server=info,closeout_core=info,closeout=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting closeout server");

    let metrics_addr = config
        .metrics_addr()
        .parse()
        .context("invalid METRICS_HOST/METRICS_PORT")?;
    metrics::install_exporter(metrics_addr)?;

    info!("Connecting to database...");
    let store = PostgresStore::connect(&config.postgres).await?;
    store.migrate().await?;
    info!("Database ready");

    let collaborators = Collaborators {
        authorizer: Arc::new(PostgresAuthorizer::new(store.pool().clone())),
        statements: Arc::new(LinkStatementGenerator::new(
            config.closeout.statement_base_url.clone(),
        )),
        notifier: Arc::new(TracingNotifier),
        emitter: Arc::new(TracingEventEmitter),
    };
    let state = AppState::from_store(
        Arc::new(store),
        collaborators,
        Arc::new(SystemClock),
        config.closeout.settings(),
        config.closeout.request_timeout(),
    );

    let app = build_router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, then arms a hard deadline for draining.
async fn shutdown_signal(drain_timeout: Duration) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }

    info!(timeout = ?drain_timeout, "Draining in-flight requests");
    tokio::spawn(async move {
        tokio::time::sleep(drain_timeout).await;
        tracing::warn!("Shutdown timeout elapsed, exiting");
        std::process::exit(1);
    });
}
