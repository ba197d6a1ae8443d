use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки брокерного транспорта и инициализации соединения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Не удалось подключиться ни к одному из адресов
    ConnectionFailed { urls: String, reason: String },
    /// Соединение ещё не готово
    NotConnected,
    /// Канал закрыт (обрыв связи с брокером)
    ChannelClosed { reason: String },
    /// Менеджер соединения закрыт окончательно
    Closed,
    /// Очередь не объявлена
    QueueNotFound { queue: String },
    /// Exchange не объявлен
    ExchangeNotFound { exchange: String },
    /// Exchange уже объявлен с другим типом
    ExchangeKindMismatch {
        exchange: String,
        existing: String,
        requested: String,
    },
    /// Сбой настройки канала (объявление очередей, подписки)
    InitFailure { reason: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { urls, reason } => {
                write!(f, "Failed to connect to [{urls}]: {reason}")
            }
            Self::NotConnected => write!(f, "Broker connection is not ready"),
            Self::ChannelClosed { reason } => write!(f, "Channel closed: {reason}"),
            Self::Closed => write!(f, "Connection manager is closed"),
            Self::QueueNotFound { queue } => write!(f, "Queue not found: {queue}"),
            Self::ExchangeNotFound { exchange } => write!(f, "Exchange not found: {exchange}"),
            Self::ExchangeKindMismatch {
                exchange,
                existing,
                requested,
            } => write!(
                f,
                "Exchange '{exchange}' already declared as {existing}, requested {requested}"
            ),
            Self::InitFailure { reason } => write!(f, "Channel setup failed: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::NotConnected => StatusCode::NotConnected,
            Self::ChannelClosed { .. } | Self::Closed => StatusCode::ConnectionClosed,
            Self::QueueNotFound { .. } | Self::ExchangeNotFound { .. } => StatusCode::NotFound,
            Self::ExchangeKindMismatch { .. } => StatusCode::AlreadyExists,
            Self::InitFailure { .. } => StatusCode::ConnectionFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ConnectionFailed { .. } => "Failed to connect to broker".to_string(),
            Self::NotConnected => "Broker connection is not ready".to_string(),
            Self::ChannelClosed { .. } => "Broker channel closed".to_string(),
            Self::Closed => "Connection closed".to_string(),
            Self::QueueNotFound { queue } => format!("Queue not found: {queue}"),
            Self::ExchangeNotFound { exchange } => format!("Exchange not found: {exchange}"),
            Self::ExchangeKindMismatch { exchange, .. } => {
                format!("Exchange type mismatch: {exchange}")
            }
            Self::InitFailure { .. } => "Broker setup failed".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::ConnectionFailed { urls, .. } => tags.push(("urls", urls.clone())),
            Self::QueueNotFound { queue } => tags.push(("queue", queue.clone())),
            Self::ExchangeNotFound { exchange } | Self::ExchangeKindMismatch { exchange, .. } => {
                tags.push(("exchange", exchange.clone()))
            }
            _ => {}
        }

        tags
    }
}
