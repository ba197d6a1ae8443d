use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use courier_error::{CourierResult, TransportError};
use parking_lot::RwLock;
use tokio::{
    sync::{broadcast, OnceCell},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::transport::{
    Channel, ChannelSetup, ConnectOptions, Connection, ConnectionEvent, Transport,
};

/// Состояние общего соединения сервиса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Инициализации ещё не было (или последняя попытка не удалась)
    Uninitialized,
    Connecting,
    Ready,
    /// Транспорт сообщил об обрыве
    Disconnected,
    /// Транспорт переподключается
    Reconnecting,
    /// Закрыто окончательно
    Closed,
}

/// Ленивая инициализация общего соединения и канала.
///
/// Первый вызов [`ensure_ready`](Self::ensure_ready) подключается к брокеру
/// и открывает канал с настройкой сервиса; конкурентные вызовы ждут ту же
/// попытку. Неудачная попытка ничего не оставляет: следующий вызов
/// пробует снова. Переподключение выполняет транспорт, охранник только
/// отслеживает события и состояние.
pub struct ConnectionGuard {
    transport: Arc<dyn Transport>,
    urls: Vec<String>,
    options: ConnectOptions,
    setup: Arc<dyn ChannelSetup>,
    session: OnceCell<Session>,
    state: Arc<RwLock<ConnectionState>>,
    closed: AtomicBool,
}

struct Session {
    connection: Arc<dyn Connection>,
    channel: Arc<dyn Channel>,
    watcher: JoinHandle<()>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionGuard {
    pub fn new(
        transport: Arc<dyn Transport>,
        urls: Vec<String>,
        options: ConnectOptions,
        setup: Arc<dyn ChannelSetup>,
    ) -> Self {
        Self {
            transport,
            urls,
            options,
            setup,
            session: OnceCell::new(),
            state: Arc::new(RwLock::new(ConnectionState::Uninitialized)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Возвращает канал, при необходимости инициализируя соединение.
    pub async fn ensure_ready(&self) -> CourierResult<Arc<dyn Channel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        let session = self.session.get_or_try_init(|| self.initialize()).await?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        Ok(session.channel.clone())
    }

    async fn initialize(&self) -> CourierResult<Session> {
        set_state(&self.state, ConnectionState::Connecting);
        info!(urls = ?self.urls, "connecting to broker");

        let connection = match self.transport.connect(&self.urls, self.options).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "broker connection failed");
                set_state(&self.state, ConnectionState::Uninitialized);
                return Err(e);
            }
        };
        let events = connection.events();

        let channel = match connection.create_channel(self.setup.clone()).await {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "service channel setup failed");
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "failed to close connection after setup failure");
                }
                set_state(&self.state, ConnectionState::Uninitialized);
                return Err(TransportError::InitFailure {
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if self.closed.load(Ordering::SeqCst) {
            let _ = connection.close().await;
            return Err(TransportError::Closed.into());
        }

        set_state(&self.state, ConnectionState::Ready);
        info!("broker connection ready");
        let watcher = tokio::spawn(watch_events(events, self.state.clone()));

        Ok(Session {
            connection,
            channel,
            watcher,
        })
    }

    /// Закрывает соединение. Повторные вызовы ничего не делают.
    pub async fn close(&self) -> CourierResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        set_state(&self.state, ConnectionState::Closed);
        if let Some(session) = self.session.get() {
            session.watcher.abort();
            session.connection.close().await?;
        }
        info!("broker connection closed");
        Ok(())
    }
}

/// Переход состояния. Из `Closed` выхода нет.
fn set_state(
    state: &RwLock<ConnectionState>,
    next: ConnectionState,
) {
    let mut current = state.write();
    if *current != ConnectionState::Closed {
        *current = next;
    }
}

/// Следит за событиями транспорта и обновляет состояние.
async fn watch_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    state: Arc<RwLock<ConnectionState>>,
) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Disconnected { reason }) => {
                warn!(%reason, "broker connection lost, waiting for transport to reconnect");
                set_state(&state, ConnectionState::Disconnected);
            }
            Ok(ConnectionEvent::Reconnecting { attempt }) => {
                info!(attempt, "reconnecting to broker");
                set_state(&state, ConnectionState::Reconnecting);
            }
            Ok(ConnectionEvent::Connected) => {
                info!("broker connection restored");
                set_state(&state, ConnectionState::Ready);
            }
            Ok(ConnectionEvent::Closed) => {
                set_state(&state, ConnectionState::Closed);
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "connection events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.get() {
            session.watcher.abort();
        }
    }
}
