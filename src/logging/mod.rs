//! Структурное логирование на `tracing`.
//!
//! `init_logging` собирает глобальный subscriber: фильтр (`RUST_LOG` или
//! директива из конфига), консольный слой и, при необходимости, файловый
//! слой с ежедневной ротацией.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{FileLogConfig, LogFormat, LoggingConfig};
use courier_error::{CourierResult, GenericError, StatusCode};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Событие `tracing` с уровнем, известным только во время выполнения.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            courier_error::LogLevel::Trace => tracing::trace!($($arg)+),
            courier_error::LogLevel::Debug => tracing::debug!($($arg)+),
            courier_error::LogLevel::Info => tracing::info!($($arg)+),
            courier_error::LogLevel::Warn => tracing::warn!($($arg)+),
            courier_error::LogLevel::Error => tracing::error!($($arg)+),
        }
    };
}
pub(crate) use event_at;

/// Инициализирует глобальное логирование.
///
/// Повторный вызов в том же процессе возвращает ошибку: глобальный
/// subscriber устанавливается один раз.
pub fn init_logging(config: LoggingConfig) -> CourierResult<LoggingHandle> {
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if config.console {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = match &config.file {
        Some(file) => {
            let (layer, guard) = sinks::file::layer_with_config(file);
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| {
            GenericError::new(
                StatusCode::Internal,
                format!("logging already initialized: {e}"),
            )
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        file_sink = config.file.is_some(),
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
