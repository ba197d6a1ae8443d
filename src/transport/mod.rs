//! Шов брокерного транспорта.
//!
//! Ядро RPC ничего не знает о сетевом протоколе брокера: оно работает только
//! через трейты этого модуля.
//!
//! - [`Transport`]: установка соединения по списку адресов.
//! - [`Connection`]: открытие каналов и поток событий жизненного цикла.
//! - [`Channel`]: объявление exchange/очередей, привязки, подписки,
//!   публикация.
//! - [`ChannelSetup`]: функция настройки канала; транспорт вызывает её при
//!   открытии канала и повторно после каждого переподключения.
//! - [`DeliveryHandler`]: обработчик доставленных сообщений.
//!
//! `memory` содержит внутрипроцессную реализацию с topic-маршрутизацией.

pub mod memory;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use courier_error::CourierResult;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Интервал переподключения по умолчанию.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Заголовки сообщения, которые использует RPC-слой.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Очередь, в которую нужно отправить ответ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Идентификатор, связывающий ответ с запросом
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Сообщение на границе с транспортом.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Exchange, через который прошло сообщение (пустая строка: default
    /// exchange, т.е. прямая отправка в очередь)
    pub exchange: String,
    /// Routing key (топик)
    pub routing_key: String,
    /// Тело сообщения (UTF-8 JSON)
    pub payload: Bytes,
    /// Заголовки
    pub properties: MessageProperties,
}

/// Тип exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Точное совпадение routing key и binding key
    Direct,
    /// Шаблоны `*` / `#` по словам, разделённым точкой
    Topic,
    /// Во все привязанные очереди
    Fanout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Очередь принадлежит соединению и удаляется при его потере
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Доставка без подтверждений (at-most-once)
    pub no_ack: bool,
}

/// Параметры соединения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Пауза между попытками переподключения
    pub reconnect_interval: Duration,
}

/// События жизненного цикла соединения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Соединение (вновь) установлено, каналы настроены
    Connected,
    /// Связь с брокером потеряна
    Disconnected { reason: String },
    /// Очередная попытка переподключения
    Reconnecting { attempt: u32 },
    /// Соединение закрыто окончательно
    Closed,
}

/// Обработчик доставленных сообщений.
///
/// Транспорт вызывает его последовательно для каждой очереди, в порядке
/// доставки.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        envelope: Envelope,
    );
}

/// Настройка канала.
///
/// Выполняется при открытии канала и после каждого переподключения, поэтому
/// должна быть идемпотентной.
#[async_trait]
pub trait ChannelSetup: Send + Sync + 'static {
    async fn setup(
        &self,
        channel: Arc<dyn Channel>,
    ) -> CourierResult<()>;
}

/// Канал брокера.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Объявляет exchange (идемпотентно).
    async fn assert_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> CourierResult<()>;

    /// Объявляет очередь (идемпотентно).
    async fn assert_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> CourierResult<()>;

    /// Привязывает очередь к exchange по binding key.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> CourierResult<()>;

    /// Ограничение числа неподтверждённых сообщений.
    async fn prefetch(
        &self,
        count: u16,
        global: bool,
    ) -> CourierResult<()>;

    /// Подписывает обработчик на очередь. Возвращает consumer tag.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> CourierResult<String>;

    /// Публикует сообщение в exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: MessageProperties,
    ) -> CourierResult<()>;

    /// Отправляет сообщение прямо в очередь (через default exchange).
    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Bytes,
        properties: MessageProperties,
    ) -> CourierResult<()>;
}

/// Соединение с брокером.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Открывает канал и выполняет `setup`.
    async fn create_channel(
        &self,
        setup: Arc<dyn ChannelSetup>,
    ) -> CourierResult<Arc<dyn Channel>>;

    /// Подписка на события жизненного цикла.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Закрывает соединение и все его каналы.
    async fn close(&self) -> CourierResult<()>;
}

/// Фабрика соединений.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(
        &self,
        urls: &[String],
        options: ConnectOptions,
    ) -> CourierResult<Arc<dyn Connection>>;
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MessageProperties {
    /// Заголовки запроса, ожидающего ответа.
    pub fn request(
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            reply_to: Some(reply_to.into()),
            correlation_id: Some(correlation_id.into()),
        }
    }

    /// Заголовки ответа.
    pub fn reply(correlation_id: Option<String>) -> Self {
        Self {
            reply_to: None,
            correlation_id,
        }
    }
}

impl Envelope {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Bytes,
        properties: MessageProperties,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
            properties,
        }
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

impl ExchangeOptions {
    pub fn durable() -> Self {
        Self { durable: true }
    }
}

impl QueueOptions {
    /// Долговечная общая очередь сервиса.
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
        }
    }

    /// Приватная очередь соединения (очередь ответов).
    pub fn exclusive() -> Self {
        Self {
            durable: false,
            exclusive: true,
        }
    }
}

impl ConsumeOptions {
    pub fn no_ack() -> Self {
        Self { no_ack: true }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for ExchangeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_properties() {
        let props = MessageProperties::request("client.reply.1", "c-1");
        assert_eq!(props.reply_to.as_deref(), Some("client.reply.1"));
        assert_eq!(props.correlation_id.as_deref(), Some("c-1"));
    }

    /// Тест проверяет, что ответ никогда не несёт reply_to.
    #[test]
    fn test_reply_properties_have_no_reply_to() {
        let props = MessageProperties::reply(Some("c-2".to_string()));
        assert!(props.reply_to.is_none());
        assert_eq!(props.correlation_id.as_deref(), Some("c-2"));
    }

    #[test]
    fn test_envelope_accessors() {
        let env = Envelope::new(
            "courier",
            "echo",
            Bytes::from_static(b"{}"),
            MessageProperties::request("r", "c"),
        );
        assert_eq!(env.reply_to(), Some("r"));
        assert_eq!(env.correlation_id(), Some("c"));
    }

    #[test]
    fn test_default_reconnect_interval() {
        assert_eq!(
            ConnectOptions::default().reconnect_interval,
            Duration::from_secs(5)
        );
        assert_eq!(ExchangeKind::Topic.to_string(), "topic");
    }
}
