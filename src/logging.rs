// src/logging.rs

//! Logging setup for `taskgraph` using `tracing` + `tracing-subscriber`.
//!
//! Filter selection, first match wins:
//! 1. `--log-level` CLI flag, applied to every target
//! 2. `TASKGRAPH_LOG`, parsed as `EnvFilter` directives
//!    (e.g. `"info"`, `"warn,taskgraph::engine=debug"`)
//! 3. `info`
//!
//! Logs go to STDERR; stdout carries the dry-run listing only.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "TASKGRAPH_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref())?;

    // Worker threads are named `taskgraph-worker-<i>`.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level_directive(level)));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV_VAR} value {directives:?}")),
        None => Ok(EnvFilter::new(DEFAULT_DIRECTIVES)),
    }
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_env() {
        let rendered = build_filter(Some(LogLevel::Debug), Some("error")).unwrap().to_string();
        assert!(rendered.contains("debug"), "{rendered}");
        assert!(!rendered.contains("error"), "{rendered}");
    }

    #[test]
    fn env_accepts_per_target_directives() {
        let filter = build_filter(None, Some(" warn,taskgraph::engine=trace ")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("taskgraph::engine=trace"), "{rendered}");
    }

    #[test]
    fn blank_env_falls_back_to_info() {
        for env in [Some("  "), None] {
            let rendered = build_filter(None, env).unwrap().to_string();
            assert!(rendered.contains("info"), "{rendered}");
        }
    }

    #[test]
    fn malformed_env_is_an_error() {
        let err = build_filter(None, Some("taskgraph=loudest")).unwrap_err();
        assert!(format!("{err:#}").contains(LOG_ENV_VAR));
    }
}
