//! Application state for the audit server.

use metrics_exporter_prometheus::PrometheusHandle;
use policy_audit::{AuditConfig, AuditPipeline, UpstreamClient, create_okta_client};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ServerError};

/// Configuration for the audit server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Host to bind the server to.
    pub host: String,
    /// Port to bind the server to.
    pub port: u16,
    /// Okta org URL pre-filled on the review page.
    pub default_server: Option<String>,
    /// API token pre-filled on the review page. Display only: every audit
    /// uses the token submitted with the request.
    pub default_api_key: Option<String>,
    /// Pipeline limits.
    pub audit: AuditConfig
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("default_server", &self.default_server)
            .field(
                "default_api_key",
                &self.default_api_key.as_ref().map(|_| "[redacted]")
            )
            .field("audit", &self.audit)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            default_server: None,
            default_api_key: None,
            audit: AuditConfig::default()
        }
    }
}

impl ServerConfig {
    /// Creates a new configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let audit = AuditConfig::from_env()?;
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Configuration(format!("PORT is not a valid port: {raw}")))?,
            Err(_) => 3000
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            default_server: audit.api_server.clone(),
            default_api_key: std::env::var("OKTA_API_KEY").ok().filter(|k| !k.is_empty()),
            audit
        })
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for `ServerConfig`.
#[derive(Default)]
pub struct ServerConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    default_server: Option<String>,
    default_api_key: Option<String>,
    audit: Option<AuditConfig>
}

impl ServerConfigBuilder {
    /// Sets the host to bind to.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port to bind to.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the org URL shown on the review page.
    #[must_use]
    pub fn default_server(mut self, server: impl Into<String>) -> Self {
        self.default_server = Some(server.into());
        self
    }

    /// Sets the API token shown on the review page.
    #[must_use]
    pub fn default_api_key(mut self, key: impl Into<String>) -> Self {
        self.default_api_key = Some(key.into());
        self
    }

    /// Sets the pipeline limits.
    #[must_use]
    pub fn audit(mut self, audit: AuditConfig) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<ServerConfig> {
        let audit = self.audit.unwrap_or_default();
        audit.validate()?;

        Ok(ServerConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(3000),
            default_server: self.default_server,
            default_api_key: self.default_api_key,
            audit
        })
    }
}

/// Shared application state for Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Catalog + rules pipeline.
    pub pipeline: Arc<AuditPipeline>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus recorder handle, when one is installed.
    pub metrics: Option<PrometheusHandle>
}

impl AppState {
    /// Creates a new application state backed by the Okta HTTP client.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let client = create_okta_client(&config.audit)?;
        Ok(Self::with_client(client, config))
    }

    /// Creates application state from an existing upstream client (useful for
    /// testing).
    #[must_use]
    pub fn with_client(client: Arc<dyn UpstreamClient>, config: ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(AuditPipeline::new(client, config.audit.clone())),
            config: Arc::new(config),
            metrics: None
        }
    }

    /// Attaches a Prometheus handle for the `/metrics` endpoint.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
