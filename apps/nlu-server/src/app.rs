//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use nlu_core::AppConfig;
use nlu_engine::{LanguageProcessor, NluEngine};

use crate::cli::Args;
use crate::metrics::HttpMetrics;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn NluEngine>,
    pub http_metrics: Arc<HttpMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<dyn NluEngine>) -> Self {
        Self {
            engine,
            http_metrics: Arc::new(HttpMetrics::new()),
        }
    }

    /// Build the language processor from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        info!("Initializing language processor");

        let processor = LanguageProcessor::from_config(&config.nlp)
            .context("Failed to initialize language processor")?;

        Ok(Self::new(Arc::new(processor)))
    }
}

/// Main application
pub struct App {
    config: AppConfig,
    state: AppState,
}

impl App {
    pub fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let config = load_config(&args)?;
        let state = AppState::from_config(&config)?;

        Ok(Self { config, state })
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting server");
        info!("HTTP address: {}", self.config.server.address());

        let server = Server::new(self.config.server, self.state);
        server.run().await?;

        Ok(())
    }
}

/// Configuration file plus environment, then command-line overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if args.config.exists() {
        info!(path = %args.config.display(), "Loading configuration file");
        AppConfig::load_from_file(&args.config, &args.env_prefix)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        warn!(
            path = %args.config.display(),
            "Configuration file not found, using environment and defaults"
        );
        AppConfig::load_from_env(&args.env_prefix).context("Failed to load configuration")?
    };

    if let Some(host) = &args.host {
        config.server = config.server.with_host(host.clone());
    }
    if let Some(port) = args.port {
        config.server = config.server.with_port(port);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_app_state_creation() {
        assert!(AppState::from_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_load_config_from_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "[nlp]\nconfidence_threshold = 0.9\n\n[server]\nhost = \"0.0.0.0\"\nport = 8181\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "nlu-server",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9191",
            "--env-prefix",
            "NLU_SERVER_TEST",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();

        assert_eq!(config.nlp.confidence_threshold, 0.9);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9191);
    }
}
