//! Server setup and lifecycle for the audit server.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

use crate::error::{Result, ServerError};
use crate::routes::create_router;
use crate::state::{AppState, ServerConfig};

/// The audit HTTP server.
pub struct AuditServer {
    state: AppState,
}

impl AuditServer {
    /// Creates a server instance from an existing `AppState`.
    pub fn with_state(state: AppState) -> Self {
        Self { state }
    }

    /// Runs the HTTP server.
    ///
    /// This method blocks until the server is shut down (e.g., via Ctrl+C).
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.state.config.host, self.state.config.port)
            .parse()
            .map_err(|e| ServerError::Configuration(format!("Invalid address: {e}")))?;

        let router = create_router(self.state.clone());

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Server(format!("Failed to bind to {addr}: {e}")))?;

        tracing::info!(
            %addr,
            max_concurrent_fetches = self.state.config.audit.max_concurrent_fetches,
            "Audit server starting"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Server(format!("Server error: {e}")))?;

        tracing::info!("Audit server stopped");
        Ok(())
    }
}

/// Signal handler for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        () = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

/// Entry point for running the server from environment variables.
///
/// Installs the tracing subscriber and the Prometheus recorder, then serves
/// until shutdown.
pub async fn run_from_env() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Server(format!("Failed to install metrics recorder: {e}")))?;

    let state = AppState::new(config)?.with_metrics(handle);
    AuditServer::with_state(state).run().await
}
