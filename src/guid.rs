//! Генерация correlation id.
//!
//! Идентификатор непрозрачен для всех, кроме реестра ожидающих вызовов:
//! это строка UUID v4, которая уходит в заголовок `correlation_id` и
//! возвращается обратно в ответе.

use std::{borrow::Borrow, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Возвращает новый уникальный идентификатор (UUID v4, hyphenated).
pub fn guid() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation id, связывающий ответ с запросом.
///
/// Клонирование дешёвое (`Arc<str>`). Реализует `Borrow<str>`, поэтому
/// реестр ищет записи по `&str`, пришедшему из заголовка ответа.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Создаёт новый случайный идентификатор.
    pub fn generate() -> Self {
        Self(Arc::from(guid()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<CorrelationId> for String {
    fn from(value: CorrelationId) -> Self {
        value.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Тест проверяет, что идентификаторы не повторяются.
    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<CorrelationId> = (0..10_000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    /// Тест проверяет формат: hyphenated UUID v4.
    #[test]
    fn test_guid_is_uuid_v4() {
        let id = guid();
        let parsed = Uuid::parse_str(&id).expect("valid uuid");
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.len(), 36);
    }

    /// Тест проверяет поиск по `&str` через `Borrow<str>`.
    #[test]
    fn test_lookup_by_str() {
        let id = CorrelationId::from("abc-123");
        let set: HashSet<CorrelationId> = [id.clone()].into_iter().collect();
        assert!(set.contains("abc-123"));
        assert_eq!(id.to_string(), "abc-123");
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = CorrelationId::from("c-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-7\"");
        let back: CorrelationId = serde_json::from_str("\"c-7\"").unwrap();
        assert_eq!(back, id);
    }
}
