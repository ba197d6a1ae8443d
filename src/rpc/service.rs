use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use courier_error::{CourierResult, RouteError, RpcError, StackError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    setup::ServiceSetup, ConnectionGuard, ConnectionState, CorrelationRegistry, RpcStats,
    RpcStatsSnapshot,
};
use crate::{
    config::RpcConfig,
    guid::{guid, CorrelationId},
    routing::{FnHandler, Route, RouteHandler, RouteKind, RouteTable},
    transport::{MessageProperties, Transport},
};

/// RPC-клиент и сервис поверх topic-брокера.
///
/// - [`send`](Self::send): запрос с ожиданием ответа;
/// - [`notify`](Self::notify): уведомление без ответа;
/// - маршруты обрабатывают входящие сообщения очереди сервиса.
///
/// Соединение поднимается лениво при первом `send`/`notify` (или явно через
/// [`start`](Self::start)). Клонирование дешёвое, клоны разделяют одно
/// соединение и один реестр ожидающих вызовов.
#[derive(Clone)]
pub struct RpcService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: RpcConfig,
    routes: Arc<RouteTable>,
    registry: Arc<CorrelationRegistry>,
    stats: Arc<RpcStats>,
    guard: ConnectionGuard,
    reply_queue: String,
}

/// Построитель [`RpcService`].
pub struct RpcServiceBuilder {
    config: RpcConfig,
    routes: Vec<Route>,
}

////////////////////////////////////////////////////////////////////////////////
// RpcServiceBuilder
////////////////////////////////////////////////////////////////////////////////

impl RpcServiceBuilder {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
        }
    }

    /// Маршрут запроса: результат обработчика уходит ответом.
    pub fn route<F, Fut>(
        mut self,
        topic: &str,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<Option<Value>>> + Send + 'static,
    {
        self.routes.push(Route::request(topic, f));
        self
    }

    /// Маршрут уведомления: никогда не отвечает.
    pub fn notification<F, Fut>(
        mut self,
        topic: &str,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<Option<Value>>> + Send + 'static,
    {
        self.routes.push(Route::notification(topic, f));
        self
    }

    /// Маршрут с готовым обработчиком.
    pub fn route_handler(
        mut self,
        topic: &str,
        kind: RouteKind,
        handler: Arc<dyn RouteHandler>,
    ) -> Self {
        self.routes.push(Route::new(topic, kind, handler));
        self
    }

    /// Типизированный маршрут запроса: тело разбирается в `Req`, ответ
    /// сериализуется из `Resp`.
    pub fn typed_route<Req, Resp, F, Fut>(
        self,
        topic: &str,
        f: F,
    ) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<Resp>> + Send + 'static,
    {
        let f = Arc::new(f);
        let topic_name = topic.to_string();
        let handler = FnHandler(move |payload: Value| {
            let f = f.clone();
            let topic = topic_name.clone();
            async move {
                let req: Req = serde_json::from_value(payload).map_err(|e| {
                    RouteError::InvalidPayload {
                        topic: topic.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let resp = f(req).await?;
                let value = serde_json::to_value(resp).map_err(|e| RpcError::SerializationFailed {
                    topic,
                    reason: e.to_string(),
                })?;
                Ok::<_, StackError>(Some(value))
            }
        });
        self.route_handler(topic, RouteKind::Request, Arc::new(handler))
    }

    /// Проверяет конфигурацию и собирает сервис. Соединение не открывается.
    pub fn build(
        self,
        transport: Arc<dyn Transport>,
    ) -> CourierResult<RpcService> {
        self.config.validate()?;

        let routes = Arc::new(RouteTable::new());
        for route in self.routes {
            routes.register(route);
        }
        let registry = Arc::new(CorrelationRegistry::new());
        let stats = Arc::new(RpcStats::new());
        let reply_queue = format!("{}.reply.{}", self.config.reply_queue_prefix, guid());

        let setup = ServiceSetup::new(
            &self.config,
            reply_queue.clone(),
            routes.clone(),
            registry.clone(),
            stats.clone(),
        );
        let guard = ConnectionGuard::new(
            transport,
            self.config.urls.clone(),
            self.config.connect_options(),
            Arc::new(setup),
        );

        debug!(
            exchange = %self.config.exchange,
            queue = ?self.config.queue,
            routes = routes.len(),
            %reply_queue,
            "rpc service built"
        );

        Ok(RpcService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                routes,
                registry,
                stats,
                guard,
                reply_queue,
            }),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// RpcService
////////////////////////////////////////////////////////////////////////////////

impl RpcService {
    pub fn builder(config: RpcConfig) -> RpcServiceBuilder {
        RpcServiceBuilder::new(config)
    }

    /// Инициализирует соединение сразу, не дожидаясь первого `send`.
    ///
    /// Нужен процессам, которые только обслуживают запросы.
    pub async fn start(&self) -> CourierResult<()> {
        self.inner.guard.ensure_ready().await.map(|_| ())
    }

    /// Добавляет маршрут после построения сервиса.
    ///
    /// Если соединение уже готово, очередь сервиса задана, а привязки
    /// берутся из маршрутов, топик привязывается сразу. В остальных случаях
    /// он попадёт в привязки при следующей настройке канала.
    pub async fn register_route(
        &self,
        route: Route,
    ) -> CourierResult<bool> {
        let topic = route.topic.clone();
        if !self.inner.routes.register(route) {
            return Ok(false);
        }
        let config = &self.inner.config;
        if let (Some(queue), true, true) = (
            &config.queue,
            config.bindings.is_empty(),
            self.inner.guard.is_ready(),
        ) {
            let channel = self.inner.guard.ensure_ready().await?;
            channel.bind_queue(queue, &config.exchange, &topic).await?;
            debug!(%queue, %topic, "late route bound");
        }
        Ok(true)
    }

    /// Отправляет запрос и ждёт ответ.
    ///
    /// Без `reply_timeout` в конфиге ждёт бесконечно: если обработчика нет,
    /// вызов не завершится.
    pub async fn send(
        &self,
        topic: &str,
        message: Value,
    ) -> CourierResult<Value> {
        let timeout = self.inner.config.reply_timeout();
        self.request(topic, &message, timeout)
            .await
            .map(|(_, reply)| reply)
    }

    /// Как [`send`](Self::send), но с явным таймаутом на этот вызов.
    pub async fn send_with_timeout(
        &self,
        topic: &str,
        message: Value,
        timeout: Duration,
    ) -> CourierResult<Value> {
        self.request(topic, &message, Some(timeout))
            .await
            .map(|(_, reply)| reply)
    }

    /// Типизированный запрос.
    pub async fn call<Req, Resp>(
        &self,
        topic: &str,
        request: &Req,
    ) -> CourierResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let message = serde_json::to_value(request).map_err(|e| RpcError::SerializationFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        let timeout = self.inner.config.reply_timeout();
        let (id, reply) = self.request(topic, &message, timeout).await?;
        serde_json::from_value(reply).map_err(|e| {
            RpcError::InvalidReply {
                correlation_id: id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn request(
        &self,
        topic: &str,
        message: &Value,
        timeout: Option<Duration>,
    ) -> CourierResult<(CorrelationId, Value)> {
        let inner = &self.inner;
        let channel = inner.guard.ensure_ready().await?;
        let body = encode(topic, message)?;

        let id = CorrelationId::generate();
        let pending = inner.registry.register(id.clone())?;

        // при ошибке публикации `pending` удаляет свою запись при drop
        channel
            .publish(
                &inner.config.exchange,
                topic,
                body,
                MessageProperties::request(&inner.reply_queue, id.as_str()),
            )
            .await?;
        RpcStats::incr(&inner.stats.sent);
        debug!(topic, correlation_id = %id, "request sent");

        let reply = match timeout {
            None => pending.await?,
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(reply) => reply?,
                Err(_) => {
                    warn!(topic, correlation_id = %id, timeout_ms = limit.as_millis() as u64, "reply timed out");
                    return Err(RpcError::ReplyTimeout {
                        correlation_id: id.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                    .into());
                }
            },
        };
        Ok((id, reply))
    }

    /// Публикует уведомление. Ответа не ждёт и в реестр ничего не пишет.
    pub async fn notify(
        &self,
        topic: &str,
        message: Value,
    ) -> CourierResult<()> {
        let inner = &self.inner;
        let channel = inner.guard.ensure_ready().await?;
        let body = encode(topic, &message)?;
        channel
            .publish(
                &inner.config.exchange,
                topic,
                body,
                MessageProperties::default(),
            )
            .await?;
        RpcStats::incr(&inner.stats.notified);
        debug!(topic, "notification published");
        Ok(())
    }

    /// Закрывает соединение. Ожидающие вызовы завершаются `Abandoned`,
    /// последующие `send`/`notify` получают `TransportError::Closed`.
    pub async fn close(&self) -> CourierResult<()> {
        let pending = self.inner.registry.len();
        let result = self.inner.guard.close().await;
        self.inner.registry.clear();
        info!(abandoned_calls = pending, "rpc service closed");
        result
    }

    pub fn reply_queue(&self) -> &str {
        &self.inner.reply_queue
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.guard.state()
    }

    pub fn stats(&self) -> RpcStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Количество вызовов, ожидающих ответа.
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }
}

fn encode(
    topic: &str,
    message: &Value,
) -> CourierResult<Bytes> {
    serde_json::to_vec(message).map(Bytes::from).map_err(|e| {
        RpcError::SerializationFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::transport::memory::MemoryBroker;

    fn config() -> RpcConfig {
        RpcConfig::new(["memory://unit"]).with_queue("unit.svc")
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let broker = Arc::new(MemoryBroker::new());
        assert!(RpcService::builder(RpcConfig::default()).build(broker).is_err());
    }

    /// Тест проверяет формат имени очереди ответов и ленивое подключение.
    #[tokio::test]
    async fn test_reply_queue_name_and_lazy_connect() {
        let broker = MemoryBroker::new();
        let service = RpcService::builder(config().with_reply_queue_prefix("unit"))
            .build(Arc::new(broker.clone()))
            .unwrap();
        assert!(service.reply_queue().starts_with("unit.reply."));
        assert_eq!(service.state(), ConnectionState::Uninitialized);
        assert_eq!(broker.connection_count(), 0);

        service.start().await.unwrap();
        assert_eq!(service.state(), ConnectionState::Ready);
        assert!(broker.queue_exists(service.reply_queue()));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sum {
        a: i64,
        b: i64,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Total {
        total: i64,
    }

    #[tokio::test]
    async fn test_typed_route_and_call() {
        let broker = MemoryBroker::new();
        let service = RpcService::builder(config())
            .typed_route("math.sum", |req: Sum| async move {
                Ok(Total {
                    total: req.a + req.b,
                })
            })
            .build(Arc::new(broker))
            .unwrap();

        let total: Total = service.call("math.sum", &Sum { a: 2, b: 3 }).await.unwrap();
        assert_eq!(total, Total { total: 5 });

        // тело не разобралось: обработчик упал, ответа нет
        let err = service
            .send_with_timeout("math.sum", json!({"a": "x"}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), courier_error::StatusCode::Timeout);
        assert_eq!(service.stats().handler_failures, 1);
        assert_eq!(service.pending_calls(), 0);
    }

    /// Тест проверяет InvalidReply при несовпадении типа ответа.
    #[tokio::test]
    async fn test_call_with_wrong_reply_type() {
        let broker = MemoryBroker::new();
        let service = RpcService::builder(config())
            .route("echo", |v| async move { Ok(Some(v)) })
            .build(Arc::new(broker))
            .unwrap();

        let err = service
            .call::<_, Total>("echo", &json!({"unexpected": true}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::InvalidReply { .. })
        ));
    }

    /// Тест проверяет позднюю регистрацию маршрута на живом соединении.
    #[tokio::test]
    async fn test_late_route_is_bound_immediately() {
        let broker = MemoryBroker::new();
        let service = RpcService::builder(config())
            .build(Arc::new(broker.clone()))
            .unwrap();
        service.start().await.unwrap();
        assert!(broker.bindings("courier", "unit.svc").is_empty());

        let added = service
            .register_route(Route::request("late", |_| async { Ok(Some(json!("here"))) }))
            .await
            .unwrap();
        assert!(added);
        assert_eq!(broker.bindings("courier", "unit.svc"), vec!["late"]);

        let reply = service
            .send_with_timeout("late", json!(null), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, json!("here"));

        let again = service
            .register_route(Route::request("late", |_| async { Ok(None) }))
            .await
            .unwrap();
        assert!(!again);
    }
}
