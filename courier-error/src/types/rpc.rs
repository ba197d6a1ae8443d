use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки уровня запрос/ответ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Ответ пришёл с пустым телом
    NoReplyContent { correlation_id: String },
    /// Тело ответа не является валидным JSON или не подходит под ожидаемый тип
    InvalidReply {
        correlation_id: String,
        reason: String,
    },
    /// Ответ не пришёл за отведённое время
    ReplyTimeout {
        correlation_id: String,
        timeout_ms: u64,
    },
    /// Для этого correlation id уже есть ожидающий вызов
    DuplicateCorrelationId { correlation_id: String },
    /// Ожидание прервано: запись удалена из реестра без ответа
    Abandoned { correlation_id: String },
    /// Не удалось сериализовать сообщение запроса
    SerializationFailed { topic: String, reason: String },
}

impl RpcError {
    /// Correlation id, к которому относится ошибка (если есть).
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::NoReplyContent { correlation_id }
            | Self::InvalidReply { correlation_id, .. }
            | Self::ReplyTimeout { correlation_id, .. }
            | Self::DuplicateCorrelationId { correlation_id }
            | Self::Abandoned { correlation_id } => Some(correlation_id),
            Self::SerializationFailed { .. } => None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::NoReplyContent { correlation_id } => {
                write!(f, "No RPC result for correlation id {correlation_id}")
            }
            Self::InvalidReply {
                correlation_id,
                reason,
            } => write!(f, "Invalid RPC reply for {correlation_id}: {reason}"),
            Self::ReplyTimeout {
                correlation_id,
                timeout_ms,
            } => write!(
                f,
                "No reply for correlation id {correlation_id} within {timeout_ms}ms"
            ),
            Self::DuplicateCorrelationId { correlation_id } => {
                write!(f, "Correlation id {correlation_id} is already pending")
            }
            Self::Abandoned { correlation_id } => {
                write!(f, "Pending call {correlation_id} was abandoned")
            }
            Self::SerializationFailed { topic, reason } => {
                write!(f, "Failed to serialize message for '{topic}': {reason}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

impl ErrorExt for RpcError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NoReplyContent { .. } => StatusCode::NoReplyContent,
            Self::InvalidReply { .. } => StatusCode::InvalidReply,
            Self::ReplyTimeout { .. } => StatusCode::Timeout,
            Self::DuplicateCorrelationId { .. } => StatusCode::DuplicateCorrelationId,
            Self::Abandoned { .. } => StatusCode::ConnectionClosed,
            Self::SerializationFailed { .. } => StatusCode::SerializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::NoReplyContent { .. } => "No RPC result".to_string(),
            Self::InvalidReply { .. } => "Invalid RPC reply".to_string(),
            Self::ReplyTimeout { timeout_ms, .. } => {
                format!("RPC reply timed out after {timeout_ms}ms")
            }
            Self::DuplicateCorrelationId { .. } => "Duplicate correlation id".to_string(),
            Self::Abandoned { .. } => "RPC call abandoned".to_string(),
            Self::SerializationFailed { .. } => "Message format error".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "rpc".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        if let Some(id) = self.correlation_id() {
            tags.push(("correlation_id", id.to_string()));
        }
        if let Self::SerializationFailed { topic, .. } = self {
            tags.push(("topic", topic.clone()));
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reply_content() {
        let err = RpcError::NoReplyContent {
            correlation_id: "c-1".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NoReplyContent);
        assert_eq!(err.client_message(), "No RPC result");
        assert!(err.to_string().contains("c-1"));
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = RpcError::ReplyTimeout {
            correlation_id: "c-2".to_string(),
            timeout_ms: 250,
        };
        assert!(err.status_code().is_retryable());
        assert!(err.client_message().contains("250"));
    }

    /// Тест проверяет, что теги содержат correlation id.
    #[test]
    fn test_metrics_tags_carry_correlation_id() {
        let err = RpcError::DuplicateCorrelationId {
            correlation_id: "dup".to_string(),
        };
        let tags = err.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "correlation_id" && v == "dup"));
    }

    #[test]
    fn test_serialization_failed_has_no_correlation_id() {
        let err = RpcError::SerializationFailed {
            topic: "echo".to_string(),
            reason: "nan".to_string(),
        };
        assert!(err.correlation_id().is_none());
        assert!(err.metrics_tags().iter().any(|(k, _)| *k == "topic"));
    }
}
