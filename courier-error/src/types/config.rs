use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки загрузки и валидации конфигурации.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Обязательное поле не задано
    #[error("Missing required setting '{field}'")]
    Missing { field: String },
    /// Значение поля недопустимо
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
    /// Ошибка источника конфигурации (файл, окружение)
    #[error("Failed to load configuration: {reason}")]
    Load { reason: String },
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Missing { .. } => StatusCode::ConfigMissing,
            Self::Invalid { .. } => StatusCode::ConfigInvalid,
            Self::Load { .. } => StatusCode::ConfigLoad,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field() {
        let err = ConfigError::Missing {
            field: "urls".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ConfigMissing);
        assert_eq!(err.to_string(), "Missing required setting 'urls'");
    }

    /// Тест проверяет конвертацию ошибки крейта `config`.
    #[test]
    fn test_from_config_crate_error() {
        let err = ::config::ConfigError::Message("boom".to_string());
        let stack: crate::StackError = err.into();
        assert_eq!(stack.status_code(), StatusCode::ConfigLoad);
        assert!(stack.to_string().contains("boom"));
    }
}
