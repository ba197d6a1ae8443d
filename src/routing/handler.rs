use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use courier_error::CourierResult;
use serde_json::Value;

/// Обработчик входящих сообщений одного топика.
///
/// `Ok(Some(v))`: результат, который уйдёт ответом, если запрос его ждёт.
/// `Ok(None)`: ответа нет. `Err(_)` логируется и отбрасывается.
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        payload: Value,
    ) -> CourierResult<Option<Value>>;
}

/// Адаптер замыкания к [`RouteHandler`].
pub struct FnHandler<F>(pub F);

/// Поведение маршрута относительно ответа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteKind {
    /// Отвечает, если в запросе есть `reply_to` и обработчик вернул значение
    #[default]
    Request,
    /// Никогда не отвечает
    Notification,
}

/// Зарегистрированный маршрут.
#[derive(Clone)]
pub struct Route {
    pub topic: Arc<str>,
    pub kind: RouteKind,
    pub handler: Arc<dyn RouteHandler>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Route {
    pub fn new(
        topic: &str,
        kind: RouteKind,
        handler: Arc<dyn RouteHandler>,
    ) -> Self {
        Self {
            topic: Arc::from(topic),
            kind,
            handler,
        }
    }

    /// Маршрут запроса из замыкания.
    pub fn request<F, Fut>(
        topic: &str,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<Option<Value>>> + Send + 'static,
    {
        Self::new(topic, RouteKind::Request, Arc::new(FnHandler(f)))
    }

    /// Маршрут уведомления из замыкания.
    pub fn notification<F, Fut>(
        topic: &str,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<Option<Value>>> + Send + 'static,
    {
        Self::new(topic, RouteKind::Notification, Arc::new(FnHandler(f)))
    }

    /// Может ли маршрут отправить ответ.
    pub fn replies(&self) -> bool {
        self.kind == RouteKind::Request
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация RouteHandler
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CourierResult<Option<Value>>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: Value,
    ) -> CourierResult<Option<Value>> {
        (self.0)(payload).await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for Route {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Route")
            .field("topic", &self.topic)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
