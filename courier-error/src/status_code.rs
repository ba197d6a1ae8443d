use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 3xxx: Конфигурация
/// - 4xxx: Маршрутизация и обработчики
/// - 5xxx: Сериализация
/// - 6xxx: Сеть / транспорт
/// - 8xxx: Протокол RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidData = 2009,

    // === 3xxx: Конфигурация ===
    ConfigMissing = 3000,
    ConfigInvalid = 3001,
    ConfigLoad = 3002,

    // === 4xxx: Маршрутизация ===
    Unroutable = 4000,
    HandlerFailed = 4001,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5003,
    DeserializationFailed = 5004,

    // === 6xxx: Сеть/транспорт ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    NotConnected = 6005,
    UnexpectedEof = 6007,

    // === 8xxx: Протокол RPC ===
    InvalidUtf8 = 8004,
    NoReplyContent = 8012,
    InvalidReply = 8013,
    DuplicateCorrelationId = 8014,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Имеет ли смысл повторить операцию.
    ///
    /// Ядро само ничего не повторяет; флаг нужен вызывающей стороне.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed | Self::NotConnected | Self::ConnectionClosed
        )
    }

    /// Ошибка транспорта (диапазон 6xxx).
    pub fn is_transport_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Ошибка протокола RPC (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::Unroutable => LogLevel::Debug,
            Self::InvalidArgs | Self::InvalidData | Self::DuplicateCorrelationId => LogLevel::Info,
            Self::Timeout | Self::ConnectionClosed | Self::NotConnected | Self::NoReplyContent => {
                LogLevel::Warn
            }
            Self::Internal | Self::HandlerFailed | Self::ConnectionFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::NotConnected.is_retryable());
        assert!(!StatusCode::NoReplyContent.is_retryable());
        assert!(!StatusCode::InvalidArgs.is_retryable());
    }

    /// Тест проверяет разбиение по диапазонам.
    #[test]
    fn test_ranges() {
        assert!(StatusCode::ConnectionFailed.is_transport_error());
        assert!(!StatusCode::NoReplyContent.is_transport_error());
        assert!(StatusCode::NoReplyContent.is_protocol_error());
        assert!(StatusCode::DuplicateCorrelationId.is_protocol_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>`.
    #[test]
    fn test_from_u32() {
        assert_eq!(StatusCode::from_u32(8012), Some(StatusCode::NoReplyContent));
        assert!(StatusCode::from_u32(99999).is_none());
        let n: u32 = StatusCode::NotConnected.into();
        assert_eq!(n, 6005);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::Unroutable.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::HandlerFailed.log_level(), LogLevel::Error);
    }

    /// Тест проверяет формат `Display`.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = StatusCode::NoReplyContent.to_string();
        assert!(s.contains("NoReplyContent"));
        assert!(s.contains("8012"));
    }
}
