use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer,
    registry::LookupSpan,
};

use super::config::LogFormat;

/// Собирает fmt-слой нужного формата поверх произвольного writer.
///
/// Возвращает boxed слой, чтобы стереть конкретный тип формата.
pub fn build_formatter<S, W>(
    format: LogFormat,
    ansi: bool,
    with_target: bool,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(with_target)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(with_target)
            .with_line_number(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(with_target)
            .boxed(),
    }
}
