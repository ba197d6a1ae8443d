use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use courier_error::CourierResult;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use super::RpcStats;
use crate::{
    logging::event_at,
    routing::{Route, RouteTable},
    transport::{Channel, DeliveryHandler, Envelope, MessageProperties},
};

/// Потребитель очереди сервиса.
///
/// Для каждого сообщения ищет маршрут по routing key, вызывает обработчик
/// и, если запрос ждёт ответа, отправляет результат в `reply_to` с тем же
/// correlation id.
///
/// Маршрут ищется в порядке доставки, а обработчик запускается отдельной
/// задачей: медленный топик не задерживает остальные, а обработчик может
/// сам вызывать `send` на топик своего же сервиса. Число одновременно
/// выполняемых обработчиков ограничено `with_concurrency_limit` (prefetch);
/// при исчерпании лимита потребитель ждёт и не забирает новые сообщения.
pub struct InboundDispatcher {
    routes: Arc<RouteTable>,
    channel: Arc<dyn Channel>,
    stats: Arc<RpcStats>,
    limit: Option<Arc<Semaphore>>,
}

/// Итог обработки одного входящего сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Маршрут не найден
    Unroutable,
    /// Тело не является JSON
    Undecodable,
    /// Обработчик вернул ошибку
    HandlerFailed,
    /// Обработчик выполнен, ответ не нужен или не получен
    Handled,
    /// Обработчик выполнен, ответ отправлен
    Replied,
}

impl InboundDispatcher {
    pub fn new(
        routes: Arc<RouteTable>,
        channel: Arc<dyn Channel>,
        stats: Arc<RpcStats>,
    ) -> Self {
        Self {
            routes,
            channel,
            stats,
            limit: None,
        }
    }

    /// Ограничивает число одновременно выполняемых обработчиков.
    pub fn with_concurrency_limit(
        mut self,
        max: usize,
    ) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Обрабатывает одно сообщение очереди сервиса до конца в текущей задаче.
    pub async fn dispatch(
        &self,
        envelope: Envelope,
    ) -> Dispatch {
        let Some(route) = self.lookup(&envelope) else {
            return Dispatch::Unroutable;
        };
        execute(route, envelope, self.channel.clone(), self.stats.clone()).await
    }

    fn lookup(
        &self,
        envelope: &Envelope,
    ) -> Option<Route> {
        let topic = envelope.routing_key.as_str();
        let route = self.routes.resolve(topic);
        if route.is_none() {
            debug!(topic, "no route for inbound message, dropped");
            RpcStats::incr(&self.stats.unroutable);
        }
        route
    }
}

/// Декодирует тело, вызывает обработчик и отправляет ответ.
async fn execute(
    route: Route,
    envelope: Envelope,
    channel: Arc<dyn Channel>,
    stats: Arc<RpcStats>,
) -> Dispatch {
    let topic = envelope.routing_key.as_str();
    let payload: Value = match serde_json::from_slice(&envelope.payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(topic, error = %e, "inbound payload is not valid JSON, dropped");
            RpcStats::incr(&stats.decode_failures);
            return Dispatch::Undecodable;
        }
    };

    RpcStats::incr(&stats.inbound_dispatched);
    trace!(topic, correlation_id = ?envelope.correlation_id(), "dispatching inbound message");

    let result = match route.handler.handle(payload).await {
        Ok(result) => result,
        Err(e) => {
            event_at!(
                e.log_level(),
                topic,
                correlation_id = ?envelope.correlation_id(),
                status = %e.status_code(),
                error = %e,
                "route handler failed"
            );
            RpcStats::incr(&stats.handler_failures);
            return Dispatch::HandlerFailed;
        }
    };

    let (Some(reply_to), Some(value)) = (envelope.reply_to(), result) else {
        return Dispatch::Handled;
    };
    if !route.replies() {
        return Dispatch::Handled;
    }

    let correlation_id = envelope.properties.correlation_id.clone();
    match send_reply(channel.as_ref(), reply_to, correlation_id, &value).await {
        Ok(()) => {
            RpcStats::incr(&stats.replies_sent);
            Dispatch::Replied
        }
        Err(e) => {
            warn!(topic, reply_to, error = %e, "failed to send reply");
            Dispatch::Handled
        }
    }
}

async fn send_reply(
    channel: &dyn Channel,
    reply_to: &str,
    correlation_id: Option<String>,
    value: &Value,
) -> CourierResult<()> {
    let body = serde_json::to_vec(value)?;
    channel
        .send_to_queue(
            reply_to,
            Bytes::from(body),
            MessageProperties::reply(correlation_id),
        )
        .await
}

#[async_trait]
impl DeliveryHandler for InboundDispatcher {
    async fn handle(
        &self,
        envelope: Envelope,
    ) {
        let Some(route) = self.lookup(&envelope) else {
            return;
        };
        let permit = match &self.limit {
            Some(limit) => match limit.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                // семафор никогда не закрывается
                Err(_) => return,
            },
            None => None,
        };
        let channel = self.channel.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            execute(route, envelope, channel, stats).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use courier_error::RouteError;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::{
        routing::Route,
        transport::{ConsumeOptions, ExchangeKind, ExchangeOptions, QueueOptions},
    };

    /// Канал, который только запоминает отправленные ответы.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, Bytes, MessageProperties)>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        async fn assert_exchange(
            &self,
            _name: &str,
            _kind: ExchangeKind,
            _options: ExchangeOptions,
        ) -> CourierResult<()> {
            Ok(())
        }

        async fn assert_queue(
            &self,
            _name: &str,
            _options: QueueOptions,
        ) -> CourierResult<()> {
            Ok(())
        }

        async fn bind_queue(
            &self,
            _queue: &str,
            _exchange: &str,
            _binding_key: &str,
        ) -> CourierResult<()> {
            Ok(())
        }

        async fn prefetch(
            &self,
            _count: u16,
            _global: bool,
        ) -> CourierResult<()> {
            Ok(())
        }

        async fn consume(
            &self,
            _queue: &str,
            _handler: Arc<dyn DeliveryHandler>,
            _options: ConsumeOptions,
        ) -> CourierResult<String> {
            Ok("tag".to_string())
        }

        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _payload: Bytes,
            _properties: MessageProperties,
        ) -> CourierResult<()> {
            Ok(())
        }

        async fn send_to_queue(
            &self,
            queue: &str,
            payload: Bytes,
            properties: MessageProperties,
        ) -> CourierResult<()> {
            self.sent.lock().push((queue.to_string(), payload, properties));
            Ok(())
        }
    }

    fn setup() -> (InboundDispatcher, Arc<RecordingChannel>, Arc<RpcStats>) {
        let routes = Arc::new(RouteTable::new());
        routes.register(Route::request("echo", |v| async move { Ok(Some(v)) }));
        routes.register(Route::request("silent", |_| async { Ok(None) }));
        routes.register(Route::notification("audit", |v| async move { Ok(Some(v)) }));
        routes.register(Route::request("boom", |_| async {
            Err(RouteError::HandlerFailed {
                topic: "boom".to_string(),
                reason: "kaput".to_string(),
            }
            .into())
        }));
        let channel = Arc::new(RecordingChannel::default());
        let stats = Arc::new(RpcStats::new());
        let dispatcher = InboundDispatcher::new(routes, channel.clone(), stats.clone());
        (dispatcher, channel, stats)
    }

    fn request(
        topic: &str,
        body: &'static [u8],
        reply_to: Option<&str>,
    ) -> Envelope {
        let properties = match reply_to {
            Some(r) => MessageProperties::request(r, "c-1"),
            None => MessageProperties::default(),
        };
        Envelope::new("courier", topic, Bytes::from_static(body), properties)
    }

    /// Тест проверяет ответ с тем же correlation id в очередь reply_to.
    #[tokio::test]
    async fn test_request_is_answered() {
        let (dispatcher, channel, stats) = setup();
        let outcome = dispatcher
            .dispatch(request("echo", br#"{"x":1}"#, Some("client.reply")))
            .await;
        assert_eq!(outcome, Dispatch::Replied);

        let sent = channel.sent.lock();
        assert_eq!(sent.len(), 1);
        let (queue, body, props) = &sent[0];
        assert_eq!(queue, "client.reply");
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), json!({"x": 1}));
        assert_eq!(props.correlation_id.as_deref(), Some("c-1"));
        assert!(props.reply_to.is_none());
        assert_eq!(stats.snapshot().replies_sent, 1);
    }

    /// Тест проверяет, что сообщение без маршрута не получает ответа даже
    /// с reply_to.
    #[tokio::test]
    async fn test_unroutable_dropped_without_reply() {
        let (dispatcher, channel, stats) = setup();
        let outcome = dispatcher
            .dispatch(request("missing", b"{}", Some("client.reply")))
            .await;
        assert_eq!(outcome, Dispatch::Unroutable);
        assert!(channel.sent.lock().is_empty());
        assert_eq!(stats.snapshot().unroutable, 1);
    }

    #[tokio::test]
    async fn test_no_reply_without_reply_to_or_result() {
        let (dispatcher, channel, _) = setup();
        assert_eq!(
            dispatcher.dispatch(request("echo", b"1", None)).await,
            Dispatch::Handled
        );
        assert_eq!(
            dispatcher
                .dispatch(request("silent", b"1", Some("client.reply")))
                .await,
            Dispatch::Handled
        );
        assert!(channel.sent.lock().is_empty());
    }

    /// Тест проверяет, что маршрут-уведомление молчит даже при reply_to.
    #[tokio::test]
    async fn test_notification_route_never_replies() {
        let (dispatcher, channel, _) = setup();
        let outcome = dispatcher
            .dispatch(request("audit", b"1", Some("client.reply")))
            .await;
        assert_eq!(outcome, Dispatch::Handled);
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_failure_logged_and_dropped() {
        let (dispatcher, channel, stats) = setup();
        let outcome = dispatcher
            .dispatch(request("boom", b"{}", Some("client.reply")))
            .await;
        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert!(channel.sent.lock().is_empty());
        assert_eq!(stats.snapshot().handler_failures, 1);
        assert_eq!(stats.snapshot().replies_sent, 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_dropped() {
        let (dispatcher, channel, stats) = setup();
        let outcome = dispatcher
            .dispatch(request("echo", b"not json", Some("client.reply")))
            .await;
        assert_eq!(outcome, Dispatch::Undecodable);
        assert!(channel.sent.lock().is_empty());
        assert_eq!(stats.snapshot().decode_failures, 1);
    }

    /// Пишет вывод subscriber-а в общий буфер.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    async fn dispatch_logged(
        dispatcher: &InboundDispatcher,
        envelope: Envelope,
    ) -> (Dispatch, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let outcome = dispatcher.dispatch(envelope).await;
        (outcome, buffer.contents())
    }

    /// Тест проверяет, что уровень записи об ошибке обработчика берётся из
    /// кода статуса ошибки.
    #[tokio::test]
    async fn test_handler_failure_log_level_follows_status() {
        let (dispatcher, _, _) = setup();
        dispatcher.routes.register(Route::request("slowpoke", |_| async {
            Err(courier_error::RpcError::ReplyTimeout {
                correlation_id: "inner".to_string(),
                timeout_ms: 10,
            }
            .into())
        }));

        let (outcome, logs) =
            dispatch_logged(&dispatcher, request("boom", b"{}", Some("client.reply"))).await;
        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("route handler failed"), "{logs}");

        let (outcome, logs) =
            dispatch_logged(&dispatcher, request("slowpoke", b"{}", Some("client.reply"))).await;
        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert!(logs.contains("WARN"), "{logs}");
        assert!(!logs.contains("ERROR"), "{logs}");
    }

    /// Маршрут, обработчик которого ждёт разрешения от теста.
    fn gated(
        gate: Arc<Semaphore>,
        started: Arc<std::sync::atomic::AtomicUsize>,
    ) -> InboundDispatcher {
        let routes = Arc::new(RouteTable::new());
        routes.register(Route::request("gated", move |v| {
            let gate = gate.clone();
            let started = started.clone();
            async move {
                started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let _permit = gate.acquire().await;
                Ok(Some(v))
            }
        }));
        let channel = Arc::new(RecordingChannel::default());
        InboundDispatcher::new(routes, channel, Arc::new(RpcStats::new()))
    }

    /// Тест проверяет, что доставка не ждёт завершения обработчика.
    #[tokio::test]
    async fn test_delivery_does_not_wait_for_handler() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dispatcher = gated(gate.clone(), started.clone());

        for _ in 0..3 {
            tokio::time::timeout(
                std::time::Duration::from_secs(1),
                dispatcher.handle(request("gated", b"1", Some("client.reply"))),
            )
            .await
            .unwrap();
        }
        while started.load(std::sync::atomic::Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(3);
    }

    /// Тест проверяет, что лимит держит доставку, пока заняты все слоты.
    #[tokio::test]
    async fn test_concurrency_limit_holds_delivery() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dispatcher = gated(gate.clone(), started.clone()).with_concurrency_limit(1);

        dispatcher
            .handle(request("gated", b"1", Some("client.reply")))
            .await;
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            dispatcher.handle(request("gated", b"2", Some("client.reply"))),
        )
        .await;
        assert!(second.is_err());

        gate.add_permits(1);
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            dispatcher.handle(request("gated", b"3", Some("client.reply"))),
        )
        .await
        .unwrap();
        gate.add_permits(1);
    }
}
