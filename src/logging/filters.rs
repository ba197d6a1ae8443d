use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Строит фильтр: `RUST_LOG` побеждает, затем директива из конфига.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(config.filter_directive()).unwrap_or_else(|e| {
        eprintln!(
            "Invalid log filter directive '{}': {e}; falling back to 'info'",
            config.filter_directive()
        );
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;

    /// Тест проверяет, что без `RUST_LOG` используется директива конфига.
    #[test]
    #[serial]
    fn test_config_directive_without_env() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "courier=trace".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter_from_config(&cfg);
        assert_eq!(filter.to_string(), "courier=trace");
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_config() {
        env::set_var("RUST_LOG", "warn");
        let filter = build_filter_from_config(&LoggingConfig::default());
        env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "warn");
    }
}
