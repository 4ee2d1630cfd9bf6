//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nlu-server",
    about = "Agent NLU Server",
    version,
    long_about = "Understands agent management requests: intent classification, \
                  entity extraction and business-rule validation over HTTP."
)]
pub struct Args {
    /// Path to configuration file; environment variables are used alone when it is missing
    #[arg(
        short,
        long,
        env = "CONFIG_PATH",
        default_value = "config/default.toml"
    )]
    pub config: PathBuf,

    /// HTTP server port, overrides the configuration file
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// HTTP bind address, overrides the configuration file
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Prefix of configuration environment variables
    #[arg(long, env = "CONFIG_ENV_PREFIX", default_value = "APP")]
    pub env_prefix: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.env_prefix.trim().is_empty() {
            anyhow::bail!("--env-prefix must not be empty");
        }
        if self.port == Some(0) {
            anyhow::bail!("--port must not be 0");
        }
        Ok(())
    }
}
