//! Telemetry initialization (logging and tracing)

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Args;

/// Guards that must be kept alive for the duration of the program
pub struct TelemetryGuards;

/// Initialize the subscriber. `RUST_LOG` wins over `--log-level`.
pub fn init_telemetry(args: &Args) -> Result<TelemetryGuards> {
    let env_filter = build_filter(&args.log_level)?;

    if args.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
            .context("Failed to install JSON subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .try_init()
            .context("Failed to install subscriber")?;
    }

    Ok(TelemetryGuards)
}

fn build_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(log_level)))
        .context("Failed to create environment filter")
}

/// Workspace crates log at `level`; HTTP internals stay at warn unless tracing.
fn filter_directives(level: &str) -> String {
    let http = if level == "trace" { "trace" } else { "warn" };
    format!(
        "{level},nlu_server={level},nlu_engine={level},nlu_infra={level},tower_http={level},hyper={http}",
        level = level,
        http = http
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("nlu_engine=debug"));
        assert!(directives.ends_with("hyper=warn"));
        assert!(filter_directives("trace").ends_with("hyper=trace"));
    }

    #[test]
    fn test_filter_parses() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(EnvFilter::try_new(filter_directives(level)).is_ok());
        }
    }
}
