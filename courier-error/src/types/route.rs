use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки входящей маршрутизации.
///
/// Диспетчер никогда не отдаёт их наружу: они попадают только в логи.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Для routing key нет обработчика
    Unroutable { topic: String },
    /// Обработчик вернул ошибку
    HandlerFailed { topic: String, reason: String },
    /// Тело входящего сообщения не удалось разобрать
    InvalidPayload { topic: String, reason: String },
}

impl std::fmt::Display for RouteError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Unroutable { topic } => write!(f, "No route for topic '{topic}'"),
            Self::HandlerFailed { topic, reason } => {
                write!(f, "Handler for '{topic}' failed: {reason}")
            }
            Self::InvalidPayload { topic, reason } => {
                write!(f, "Invalid payload on '{topic}': {reason}")
            }
        }
    }
}

impl std::error::Error for RouteError {}

impl ErrorExt for RouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unroutable { .. } => StatusCode::Unroutable,
            Self::HandlerFailed { .. } => StatusCode::HandlerFailed,
            Self::InvalidPayload { .. } => StatusCode::DeserializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let topic = match self {
            Self::Unroutable { topic }
            | Self::HandlerFailed { topic, .. }
            | Self::InvalidPayload { topic, .. } => topic.clone(),
        };
        vec![
            ("error_type", "route".to_string()),
            ("status_code", self.status_code().to_string()),
            ("topic", topic),
        ]
    }
}
