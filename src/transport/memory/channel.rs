use std::sync::{atomic::Ordering, Arc};

use async_trait::async_trait;
use bytes::Bytes;
use courier_error::CourierResult;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    broker::{BrokerState, QueueEntry},
    connection::Link,
};
use crate::transport::{
    Channel, ConsumeOptions, DeliveryHandler, Envelope, ExchangeKind, ExchangeOptions,
    MessageProperties, QueueOptions,
};

/// Канал внутрипроцессного брокера.
///
/// Все операции завершаются ошибкой, пока соединение оборвано
/// (`ChannelClosed`) или закрыто (`Closed`).
pub struct MemoryChannel {
    broker: Arc<BrokerState>,
    link: Arc<Link>,
    /// Последняя установленная настройка prefetch: (count, global)
    prefetch: Mutex<Option<(u16, bool)>>,
}

/// Учитывает потребителя очереди, пока жива его задача.
struct ConsumerGuard(Arc<QueueEntry>);

impl ConsumerGuard {
    fn new(queue: Arc<QueueEntry>) -> Self {
        queue.consumers.fetch_add(1, Ordering::SeqCst);
        Self(queue)
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.0.consumers.fetch_sub(1, Ordering::SeqCst);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryChannel {
    pub(crate) fn new(
        broker: Arc<BrokerState>,
        link: Arc<Link>,
    ) -> Self {
        Self {
            broker,
            link,
            prefetch: Mutex::new(None),
        }
    }

    /// Текущая настройка prefetch.
    ///
    /// Внутрипроцессный брокер только запоминает значение: доставка и так
    /// последовательна в пределах одного потребителя.
    pub fn prefetch_setting(&self) -> Option<(u16, bool)> {
        *self.prefetch.lock()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Channel
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Channel for MemoryChannel {
    async fn assert_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> CourierResult<()> {
        self.link.ensure_open()?;
        self.broker.assert_exchange(name, kind)
    }

    async fn assert_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> CourierResult<()> {
        self.link.ensure_open()?;
        self.broker.assert_queue(name, options, self.link.id);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> CourierResult<()> {
        self.link.ensure_open()?;
        self.broker.bind_queue(queue, exchange, binding_key)
    }

    async fn prefetch(
        &self,
        count: u16,
        global: bool,
    ) -> CourierResult<()> {
        self.link.ensure_open()?;
        *self.prefetch.lock() = Some((count, global));
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> CourierResult<String> {
        self.link.ensure_open()?;
        let entry = self.broker.queue(queue)?;
        let tag = self.link.next_consumer_tag();
        let guard = ConsumerGuard::new(entry.clone());

        debug!(queue, consumer_tag = %tag, no_ack = options.no_ack, "consumer started");
        let task = tokio::spawn(async move {
            let _guard = guard;
            loop {
                // один приёмник на всех потребителей очереди: кто первым
                // захватил блокировку, тот и получает следующее сообщение
                let next = {
                    let mut rx = entry.rx.lock().await;
                    rx.recv().await
                };
                let Some(envelope) = next else {
                    trace!(queue = %entry.name, "queue closed, consumer stops");
                    break;
                };
                handler.handle(envelope).await;
            }
        });
        self.link.track_consumer(task);
        Ok(tag)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: MessageProperties,
    ) -> CourierResult<()> {
        self.link.ensure_open()?;
        self.broker
            .route(Envelope::new(exchange, routing_key, payload, properties))
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Bytes,
        properties: MessageProperties,
    ) -> CourierResult<()> {
        self.publish("", queue, payload, properties).await
    }
}
