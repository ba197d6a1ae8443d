use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_error::{CourierResult, TransportError};
use parking_lot::Mutex;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{broker::BrokerState, MemoryChannel};
use crate::transport::{Channel, ChannelSetup, ConnectOptions, Connection, ConnectionEvent};

/// Ёмкость буфера событий соединения.
const EVENT_CAPACITY: usize = 32;

/// Соединение с [`MemoryBroker`](super::MemoryBroker).
///
/// Запоминает функции настройки всех открытых каналов и повторяет их после
/// переподключения. Каналы при этом остаются теми же объектами.
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

/// Состояние связи, разделяемое соединением и его каналами.
pub(crate) struct Link {
    pub(crate) id: u64,
    connected: AtomicBool,
    closed: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    next_tag: AtomicU64,
}

pub(crate) struct ConnectionInner {
    broker: Arc<BrokerState>,
    link: Arc<Link>,
    options: ConnectOptions,
    events: broadcast::Sender<ConnectionEvent>,
    channels: Mutex<Vec<(Arc<MemoryChannel>, Arc<dyn ChannelSetup>)>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryConnection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.is_connected()
    }

    /// Имитирует обрыв связи только у этого соединения.
    pub fn interrupt(
        &self,
        reason: &str,
    ) {
        self.inner.interrupt(reason);
    }
}

impl Link {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
            next_tag: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Канал можно использовать только на живом соединении.
    pub(crate) fn ensure_open(&self) -> CourierResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        if !self.is_connected() {
            return Err(TransportError::ChannelClosed {
                reason: "connection lost".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn next_consumer_tag(&self) -> String {
        let n = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ctag-{}.{n}", self.id)
    }

    pub(crate) fn track_consumer(
        &self,
        handle: JoinHandle<()>,
    ) {
        let mut consumers = self.consumers.lock();
        consumers.retain(|h| !h.is_finished());
        consumers.push(handle);
    }

    fn abort_consumers(&self) {
        for handle in self.consumers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl ConnectionInner {
    pub(crate) fn new(
        broker: Arc<BrokerState>,
        options: ConnectOptions,
    ) -> Arc<Self> {
        let id = broker.next_connection_id();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            broker,
            link: Arc::new(Link::new(id)),
            options,
            events,
            channels: Mutex::new(Vec::new()),
            reconnect: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.link.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    fn emit(
        &self,
        event: ConnectionEvent,
    ) {
        // без подписчиков событие просто теряется
        let _ = self.events.send(event);
    }

    /// Рвёт связь и запускает цикл переподключения.
    pub(crate) fn interrupt(
        self: &Arc<Self>,
        reason: &str,
    ) {
        if self.link.is_closed() || !self.link.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.link.abort_consumers();
        self.broker.drop_exclusive_queues(self.id());
        warn!(connection_id = self.id(), reason, "broker connection lost");
        self.emit(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });

        let task = tokio::spawn(Self::reconnect_loop(
            Arc::downgrade(self),
            self.options.reconnect_interval,
        ));
        if let Some(previous) = self.reconnect.lock().replace(task) {
            previous.abort();
        }
    }

    async fn reconnect_loop(
        weak: Weak<Self>,
        interval: Duration,
    ) {
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(interval).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            if this.is_closed() {
                return;
            }
            attempt += 1;
            this.emit(ConnectionEvent::Reconnecting { attempt });
            if !this.broker.is_reachable() {
                debug!(connection_id = this.id(), attempt, "broker still unreachable");
                continue;
            }
            match this.restore().await {
                Ok(()) if !this.is_closed() => {
                    info!(connection_id = this.id(), attempt, "broker connection restored");
                    this.emit(ConnectionEvent::Connected);
                    return;
                }
                Ok(()) => return,
                Err(e) => {
                    warn!(connection_id = this.id(), attempt, error = %e, "channel setup failed after reconnect");
                    this.link.connected.store(false, Ordering::SeqCst);
                    this.link.abort_consumers();
                    this.broker.drop_exclusive_queues(this.id());
                }
            }
        }
    }

    /// Повторяет настройку всех каналов на восстановленной связи.
    async fn restore(&self) -> CourierResult<()> {
        self.link.connected.store(true, Ordering::SeqCst);
        let channels = self.channels.lock().clone();
        for (channel, setup) in channels {
            setup.setup(channel).await?;
        }
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(task) = self.reconnect.lock().take() {
            task.abort();
        }
        self.link.abort_consumers();
        self.broker.drop_exclusive_queues(self.id());
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Connection
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(
        &self,
        setup: Arc<dyn ChannelSetup>,
    ) -> CourierResult<Arc<dyn Channel>> {
        let inner = &self.inner;
        inner.link.ensure_open()?;
        let channel = Arc::new(MemoryChannel::new(inner.broker.clone(), inner.link.clone()));
        setup.setup(channel.clone()).await?;
        inner.channels.lock().push((channel.clone(), setup));
        debug!(connection_id = inner.id(), "channel opened");
        Ok(channel as Arc<dyn Channel>)
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    async fn close(&self) -> CourierResult<()> {
        let inner = &self.inner;
        if inner.link.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.link.connected.store(false, Ordering::SeqCst);
        inner.shutdown();
        inner.channels.lock().clear();
        debug!(connection_id = inner.id(), "memory connection closed");
        inner.emit(ConnectionEvent::Closed);
        Ok(())
    }
}
