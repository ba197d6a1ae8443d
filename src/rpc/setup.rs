use std::sync::Arc;

use async_trait::async_trait;
use courier_error::{CourierResult, ResultExt};
use tracing::debug;

use super::{CorrelationRegistry, InboundDispatcher, ReplyDispatcher, RpcStats};
use crate::{
    config::{PrefetchConfig, RpcConfig},
    routing::RouteTable,
    transport::{
        Channel, ChannelSetup, ConsumeOptions, ExchangeKind, ExchangeOptions, QueueOptions,
    },
};

/// Настройка канала сервиса.
///
/// Транспорт выполняет её при первом открытии канала и после каждого
/// переподключения. Порядок: exchange, prefetch, очередь сервиса с
/// привязками и входящим диспетчером, приватная очередь ответов с
/// диспетчером ответов.
pub(crate) struct ServiceSetup {
    exchange: String,
    queue: Option<String>,
    bindings: Vec<String>,
    prefetch: Option<PrefetchConfig>,
    reply_queue: String,
    routes: Arc<RouteTable>,
    registry: Arc<CorrelationRegistry>,
    stats: Arc<RpcStats>,
}

impl ServiceSetup {
    pub(crate) fn new(
        config: &RpcConfig,
        reply_queue: String,
        routes: Arc<RouteTable>,
        registry: Arc<CorrelationRegistry>,
        stats: Arc<RpcStats>,
    ) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            bindings: config.bindings.clone(),
            prefetch: config.prefetch,
            reply_queue,
            routes,
            registry,
            stats,
        }
    }

    /// Binding keys очереди сервиса: явные из конфига или топики маршрутов.
    fn binding_keys(&self) -> Vec<String> {
        if self.bindings.is_empty() {
            self.routes.topics()
        } else {
            self.bindings.clone()
        }
    }
}

#[async_trait]
impl ChannelSetup for ServiceSetup {
    async fn setup(
        &self,
        channel: Arc<dyn Channel>,
    ) -> CourierResult<()> {
        channel
            .assert_exchange(&self.exchange, ExchangeKind::Topic, ExchangeOptions::durable())
            .await
            .with_context(|| format!("failed to declare exchange '{}'", self.exchange))?;

        if let Some(prefetch) = self.prefetch {
            channel.prefetch(prefetch.count, prefetch.global).await?;
        }

        if let Some(queue) = &self.queue {
            channel
                .assert_queue(queue, QueueOptions::durable())
                .await
                .with_context(|| format!("failed to declare service queue '{queue}'"))?;
            for key in self.binding_keys() {
                channel.bind_queue(queue, &self.exchange, &key).await?;
                debug!(queue = %queue, exchange = %self.exchange, binding_key = %key, "queue bound");
            }
            let mut inbound =
                InboundDispatcher::new(self.routes.clone(), channel.clone(), self.stats.clone());
            if let Some(prefetch) = self.prefetch {
                inbound = inbound.with_concurrency_limit(usize::from(prefetch.count));
            }
            channel
                .consume(queue, Arc::new(inbound), ConsumeOptions::no_ack())
                .await?;
        }

        channel
            .assert_queue(&self.reply_queue, QueueOptions::exclusive())
            .await
            .with_context(|| format!("failed to declare reply queue '{}'", self.reply_queue))?;
        let replies = ReplyDispatcher::new(self.registry.clone(), self.stats.clone());
        channel
            .consume(&self.reply_queue, Arc::new(replies), ConsumeOptions::no_ack())
            .await?;

        debug!(
            exchange = %self.exchange,
            queue = ?self.queue,
            reply_queue = %self.reply_queue,
            "service channel ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routing::Route,
        transport::{memory::MemoryBroker, ConnectOptions, Connection, Transport},
    };

    fn setup_for(config: &RpcConfig) -> (ServiceSetup, Arc<RouteTable>) {
        let routes = Arc::new(RouteTable::new());
        routes.register(Route::request("echo", |v| async move { Ok(Some(v)) }));
        routes.register(Route::notification("audit", |_| async { Ok(None) }));
        let setup = ServiceSetup::new(
            config,
            "courier.reply.test".to_string(),
            routes.clone(),
            Arc::new(CorrelationRegistry::new()),
            Arc::new(RpcStats::new()),
        );
        (setup, routes)
    }

    async fn open(
        broker: &MemoryBroker,
        setup: ServiceSetup,
    ) -> Arc<dyn Connection> {
        let conn = broker
            .connect(&["memory://t".to_string()], ConnectOptions::default())
            .await
            .unwrap();
        conn.create_channel(Arc::new(setup)).await.unwrap();
        conn
    }

    /// Тест проверяет привязку очереди к топикам маршрутов по умолчанию.
    #[tokio::test]
    async fn test_default_bindings_are_route_topics() {
        let broker = MemoryBroker::new();
        let config = RpcConfig::new(["memory://t"]).with_queue("svc");
        let (setup, _) = setup_for(&config);
        let _conn = open(&broker, setup).await;

        assert_eq!(broker.exchange_kind("courier"), Some(ExchangeKind::Topic));
        assert_eq!(broker.bindings("courier", "svc"), vec!["echo", "audit"]);
        assert_eq!(broker.consumer_count("svc"), 1);
        assert_eq!(broker.consumer_count("courier.reply.test"), 1);
    }

    #[tokio::test]
    async fn test_explicit_bindings_win() {
        let broker = MemoryBroker::new();
        let config = RpcConfig::new(["memory://t"])
            .with_queue("svc")
            .with_bindings(["orders.#"]);
        let (setup, _) = setup_for(&config);
        let _conn = open(&broker, setup).await;
        assert_eq!(broker.bindings("courier", "svc"), vec!["orders.#"]);
    }

    /// Тест проверяет, что без очереди сервиса поднимается только очередь
    /// ответов.
    #[tokio::test]
    async fn test_client_only_setup() {
        let broker = MemoryBroker::new();
        let config = RpcConfig::new(["memory://t"]);
        let (setup, _) = setup_for(&config);
        let _conn = open(&broker, setup).await;
        assert!(!broker.queue_exists("svc"));
        assert!(broker.queue_exists("courier.reply.test"));
    }

    #[tokio::test]
    async fn test_exchange_kind_conflict_fails_setup() {
        let broker = MemoryBroker::new();
        let config = RpcConfig::new(["memory://t"]);
        let (setup, _) = setup_for(&config);
        let conn = broker
            .connect(&["memory://t".to_string()], ConnectOptions::default())
            .await
            .unwrap();

        struct Fanout;
        #[async_trait]
        impl ChannelSetup for Fanout {
            async fn setup(
                &self,
                channel: Arc<dyn Channel>,
            ) -> CourierResult<()> {
                channel
                    .assert_exchange("courier", ExchangeKind::Fanout, ExchangeOptions::durable())
                    .await
            }
        }
        conn.create_channel(Arc::new(Fanout)).await.unwrap();

        let err = conn.create_channel(Arc::new(setup)).await.err().unwrap();
        assert!(err.to_string().contains("failed to declare exchange 'courier'"));
    }
}
