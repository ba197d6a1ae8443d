use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CorrelationRegistry, RpcStats};
use crate::transport::{DeliveryHandler, Envelope};

/// Потребитель приватной очереди ответов.
///
/// Каждое сообщение передаётся в реестр по его correlation id. Ответы без
/// correlation id и ответы, которых никто не ждёт, отбрасываются.
pub struct ReplyDispatcher {
    registry: Arc<CorrelationRegistry>,
    stats: Arc<RpcStats>,
}

impl ReplyDispatcher {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        stats: Arc<RpcStats>,
    ) -> Self {
        Self { registry, stats }
    }

    /// Обрабатывает одно сообщение из очереди ответов.
    pub fn dispatch(
        &self,
        envelope: &Envelope,
    ) -> bool {
        let Some(id) = envelope.correlation_id() else {
            warn!(queue = %envelope.routing_key, "reply without correlation id dropped");
            RpcStats::incr(&self.stats.replies_discarded);
            return false;
        };
        if self.registry.fulfil(id, &envelope.payload) {
            RpcStats::incr(&self.stats.replies_matched);
            true
        } else {
            debug!(correlation_id = id, "late or unknown reply discarded");
            RpcStats::incr(&self.stats.replies_discarded);
            false
        }
    }
}

#[async_trait]
impl DeliveryHandler for ReplyDispatcher {
    async fn handle(
        &self,
        envelope: Envelope,
    ) {
        self.dispatch(&envelope);
    }
}
