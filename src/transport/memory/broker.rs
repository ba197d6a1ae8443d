use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use courier_error::{CourierResult, TransportError};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{connection::ConnectionInner, topic::topic_matches, MemoryConnection, MEMORY_SCHEME};
use crate::transport::{
    ConnectOptions, Connection, Envelope, ExchangeKind, QueueOptions, Transport,
};

/// Внутрипроцессный брокер.
///
/// Клонирование дешёвое: все клоны разделяют одно состояние, поэтому
/// несколько сервисов, подключённых к одному `MemoryBroker`, видят общие
/// exchange и очереди.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

/// Общее состояние брокера.
#[derive(Default)]
pub(crate) struct BrokerState {
    /// Имя exchange → тип и привязки
    exchanges: DashMap<String, ExchangeEntry>,
    /// Имя очереди → очередь
    queues: DashMap<String, Arc<QueueEntry>>,
    /// Брокер недоступен: новые подключения и переподключения отклоняются
    unreachable: AtomicBool,
    /// Живые соединения (для имитации обрыва)
    connections: Mutex<Vec<Weak<ConnectionInner>>>,
    next_connection_id: AtomicU64,
    /// Общее количество принятых публикаций
    publish_count: AtomicUsize,
    /// Публикации, не попавшие ни в одну очередь
    unroutable_count: AtomicUsize,
}

struct ExchangeEntry {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    key: String,
}

/// Очередь: неограниченный буфер и общий приёмник для конкурирующих
/// потребителей.
pub(crate) struct QueueEntry {
    pub(crate) name: String,
    tx: mpsc::UnboundedSender<Envelope>,
    pub(crate) rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    /// Владелец эксклюзивной очереди (id соединения)
    owner: Option<u64>,
    pub(crate) consumers: AtomicUsize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Включает или выключает доступность брокера.
    ///
    /// Недоступный брокер отклоняет `connect`, а оборванные соединения
    /// продолжают попытки переподключения, пока доступность не вернётся.
    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.state.is_reachable()
    }

    /// Имитирует обрыв связи у всех открытых соединений.
    ///
    /// Каждое соединение публикует `Disconnected`, теряет потребителей и
    /// эксклюзивные очереди, затем через `reconnect_interval` начинает
    /// переподключение. Должен вызываться внутри tokio runtime.
    pub fn interrupt(
        &self,
        reason: &str,
    ) {
        for conn in self.state.live_connections() {
            conn.interrupt(reason);
        }
    }

    /// Количество открытых (не закрытых) соединений.
    pub fn connection_count(&self) -> usize {
        self.state.live_connections().len()
    }

    pub fn queue_exists(
        &self,
        queue: &str,
    ) -> bool {
        self.state.queues.contains_key(queue)
    }

    pub fn exchange_kind(
        &self,
        exchange: &str,
    ) -> Option<ExchangeKind> {
        self.state.exchanges.get(exchange).map(|e| e.kind)
    }

    /// Количество активных потребителей очереди.
    pub fn consumer_count(
        &self,
        queue: &str,
    ) -> usize {
        self.state
            .queues
            .get(queue)
            .map(|q| q.consumers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Binding keys, которыми очередь привязана к exchange.
    pub fn bindings(
        &self,
        exchange: &str,
        queue: &str,
    ) -> Vec<String> {
        self.state
            .exchanges
            .get(exchange)
            .map(|e| {
                e.bindings
                    .iter()
                    .filter(|b| b.queue == queue)
                    .map(|b| b.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn publish_count(&self) -> usize {
        self.state.publish_count.load(Ordering::Relaxed)
    }

    pub fn unroutable_count(&self) -> usize {
        self.state.unroutable_count.load(Ordering::Relaxed)
    }
}

impl BrokerState {
    pub(crate) fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register_connection(
        &self,
        conn: &Arc<ConnectionInner>,
    ) {
        let mut list = self.connections.lock();
        list.retain(|w| w.strong_count() > 0);
        list.push(Arc::downgrade(conn));
    }

    fn live_connections(&self) -> Vec<Arc<ConnectionInner>> {
        self.connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .collect()
    }

    /// Объявляет exchange. Повторное объявление с другим типом считается ошибкой.
    pub(crate) fn assert_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
    ) -> CourierResult<()> {
        let entry = self
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| ExchangeEntry {
                kind,
                bindings: Vec::new(),
            });
        if entry.kind != kind {
            return Err(TransportError::ExchangeKindMismatch {
                exchange: name.to_string(),
                existing: entry.kind.to_string(),
                requested: kind.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Объявляет очередь. Существующая очередь остаётся как есть.
    pub(crate) fn assert_queue(
        &self,
        name: &str,
        options: QueueOptions,
        connection_id: u64,
    ) {
        self.queues.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            debug!(queue = name, exclusive = options.exclusive, "queue declared");
            Arc::new(QueueEntry {
                name: name.to_string(),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                owner: options.exclusive.then_some(connection_id),
                consumers: AtomicUsize::new(0),
            })
        });
    }

    pub(crate) fn queue(
        &self,
        name: &str,
    ) -> CourierResult<Arc<QueueEntry>> {
        self.queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| {
                TransportError::QueueNotFound {
                    queue: name.to_string(),
                }
                .into()
            })
    }

    pub(crate) fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        key: &str,
    ) -> CourierResult<()> {
        if !self.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound {
                queue: queue.to_string(),
            }
            .into());
        }
        let mut entry =
            self.exchanges
                .get_mut(exchange)
                .ok_or_else(|| TransportError::ExchangeNotFound {
                    exchange: exchange.to_string(),
                })?;
        let binding = Binding {
            queue: queue.to_string(),
            key: key.to_string(),
        };
        if !entry.bindings.contains(&binding) {
            entry.bindings.push(binding);
        }
        Ok(())
    }

    /// Маршрутизирует сообщение.
    ///
    /// Пустое имя exchange означает default exchange: сообщение идёт в
    /// очередь с именем `routing_key`. Сообщение, не нашедшее ни одной
    /// очереди, молча отбрасывается.
    pub(crate) fn route(
        &self,
        envelope: Envelope,
    ) -> CourierResult<()> {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<QueueEntry>> = if envelope.exchange.is_empty() {
            self.queues
                .get(&envelope.routing_key)
                .map(|q| vec![q.value().clone()])
                .unwrap_or_default()
        } else {
            let entry = self.exchanges.get(&envelope.exchange).ok_or_else(|| {
                TransportError::ExchangeNotFound {
                    exchange: envelope.exchange.clone(),
                }
            })?;
            let mut names: Vec<&str> = entry
                .bindings
                .iter()
                .filter(|b| match entry.kind {
                    ExchangeKind::Topic => topic_matches(&b.key, &envelope.routing_key),
                    ExchangeKind::Direct => b.key == envelope.routing_key,
                    ExchangeKind::Fanout => true,
                })
                .map(|b| b.queue.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();
            names
                .into_iter()
                .filter_map(|n| self.queues.get(n).map(|q| q.value().clone()))
                .collect()
        };

        if targets.is_empty() {
            self.unroutable_count.fetch_add(1, Ordering::Relaxed);
            trace!(
                exchange = %envelope.exchange,
                routing_key = %envelope.routing_key,
                "message dropped: no matching queue"
            );
            return Ok(());
        }

        let mut delivered = 0;
        for queue in targets {
            if queue.tx.send(envelope.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(queue = %queue.name, "message dropped: queue receiver closed");
            }
        }
        if delivered == 0 {
            self.unroutable_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Удаляет эксклюзивные очереди соединения вместе с их привязками.
    pub(crate) fn drop_exclusive_queues(
        &self,
        connection_id: u64,
    ) {
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|q| q.owner == Some(connection_id))
            .map(|q| q.key().clone())
            .collect();
        if owned.is_empty() {
            return;
        }
        for name in &owned {
            self.queues.remove(name);
            debug!(queue = %name, connection_id, "exclusive queue deleted");
        }
        for mut exchange in self.exchanges.iter_mut() {
            exchange.bindings.retain(|b| !owned.contains(&b.queue));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Transport
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(
        &self,
        urls: &[String],
        options: ConnectOptions,
    ) -> CourierResult<Arc<dyn Connection>> {
        let joined = urls.join(",");
        if urls.is_empty() {
            return Err(TransportError::ConnectionFailed {
                urls: joined,
                reason: "no broker urls configured".to_string(),
            }
            .into());
        }
        if let Some(bad) = urls.iter().find(|u| !u.starts_with(MEMORY_SCHEME)) {
            return Err(TransportError::ConnectionFailed {
                urls: joined,
                reason: format!("unsupported url '{bad}', expected {MEMORY_SCHEME}"),
            }
            .into());
        }
        if !self.state.is_reachable() {
            return Err(TransportError::ConnectionFailed {
                urls: joined,
                reason: "broker unreachable".to_string(),
            }
            .into());
        }

        let inner = ConnectionInner::new(self.state.clone(), options);
        self.state.register_connection(&inner);
        debug!(connection_id = inner.id(), urls = %joined, "memory connection opened");
        Ok(Arc::new(MemoryConnection::from_inner(inner)))
    }
}
