use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer, registry::LookupSpan};

use crate::logging::{config::FileLogConfig, formatter};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// `WorkerGuard` нужно держать до завершения процесса: при его drop
/// сбрасываются оставшиеся в буфере события.
pub fn layer_with_config<S>(config: &FileLogConfig) -> (Box<dyn Layer<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = rolling::daily(&config.dir, &config.prefix);
    let (writer, guard) = non_blocking(appender);
    let layer = formatter::build_formatter(config.format, false, true, writer);
    (layer, guard)
}
