use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Счётчики RPC-движка. Обновляются без блокировок.
#[derive(Debug, Default)]
pub struct RpcStats {
    /// Отправленные запросы (`send`)
    pub sent: AtomicU64,
    /// Отправленные уведомления (`notify`)
    pub notified: AtomicU64,
    /// Ответы, нашедшие своего ожидающего
    pub replies_matched: AtomicU64,
    /// Ответы с неизвестным или уже использованным correlation id
    pub replies_discarded: AtomicU64,
    /// Входящие сообщения, переданные обработчику
    pub inbound_dispatched: AtomicU64,
    /// Входящие сообщения без маршрута
    pub unroutable: AtomicU64,
    /// Ответы, отправленные обработчиками
    pub replies_sent: AtomicU64,
    /// Ошибки обработчиков
    pub handler_failures: AtomicU64,
    /// Входящие сообщения с невалидным JSON
    pub decode_failures: AtomicU64,
}

/// Снимок [`RpcStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RpcStatsSnapshot {
    pub sent: u64,
    pub notified: u64,
    pub replies_matched: u64,
    pub replies_discarded: u64,
    pub inbound_dispatched: u64,
    pub unroutable: u64,
    pub replies_sent: u64,
    pub handler_failures: u64,
    pub decode_failures: u64,
}

impl RpcStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RpcStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RpcStatsSnapshot {
            sent: load(&self.sent),
            notified: load(&self.notified),
            replies_matched: load(&self.replies_matched),
            replies_discarded: load(&self.replies_discarded),
            inbound_dispatched: load(&self.inbound_dispatched),
            unroutable: load(&self.unroutable),
            replies_sent: load(&self.replies_sent),
            handler_failures: load(&self.handler_failures),
            decode_failures: load(&self.decode_failures),
        }
    }
}
