/*!
 * Logging and tracing initialization
 *
 * Engine and dispatcher events are emitted under the `sharelink` target;
 * retry attempts come from `sharelink_core_resilience`. Both follow the
 * configured level unless `RUST_LOG` is set.
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::EngineConfig;
use crate::error::{Result, ShareError};

const TARGETS: &[&str] = &["sharelink", "sharelink_core_resilience"];

/// Install the global subscriber: compact stdout, or JSON lines when
/// `log_file` is set
pub fn init_logging(config: &EngineConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(effective_level(config))))
        .map_err(|e| ShareError::Config(format!("Failed to create log filter: {}", e)))?;

    match config.log_file {
        Some(ref log_path) => init_json_file(log_path, env_filter),
        None => init_stdout(env_filter),
    }
    .map_err(|e| ShareError::Config(format!("Failed to install subscriber: {}", e)))
}

fn effective_level(config: &EngineConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn filter_directive(level: Level) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

type InitResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn init_stdout(env_filter: EnvFilter) -> InitResult {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn init_json_file(log_path: &Path, env_filter: EnvFilter) -> InitResult {
    let file = File::create(log_path)?;

    // Span close events carry operation timings
    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Route both crates' events to the test harness output, once per process
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(Level::DEBUG)));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = EngineConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let config = EngineConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_directive_covers_resilience_crate() {
        assert_eq!(
            filter_directive(Level::INFO),
            "sharelink=INFO,sharelink_core_resilience=INFO"
        );
        assert!(EnvFilter::try_new(filter_directive(Level::TRACE)).is_ok());
    }
}
