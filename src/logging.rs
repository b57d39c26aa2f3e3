use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_TARGETS: [&str; 2] = ["mammoscan", "tower_http"];

/// Builds the default filter directive, e.g. `mammoscan=info,tower_http=info`.
pub fn default_directives(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence over the config level.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true);

    let fmt_layer = if config.json {
        fmt_layer.json().flatten_event(true).boxed()
    } else {
        fmt_layer.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives("debug"),
            "mammoscan=debug,tower_http=debug"
        );
    }

    #[test]
    fn test_init_logging_twice() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&LoggingConfig {
            level: "warn".to_string(),
            json: true,
        });
        tracing::info!("logging initialized");
    }
}
