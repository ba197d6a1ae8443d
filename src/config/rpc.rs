use std::time::Duration;

use courier_error::{ensure, ConfigError, CourierResult};
use serde::{Deserialize, Serialize};

use crate::transport::{ConnectOptions, DEFAULT_RECONNECT_INTERVAL};

/// Настройки RPC-сервиса.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Адреса брокера; используется первый доступный
    pub urls: Vec<String>,
    /// Topic-exchange для запросов и уведомлений
    pub exchange: String,
    /// Очередь сервиса; без неё сервис только отправляет
    pub queue: Option<String>,
    /// Binding keys очереди сервиса; пусто = топики всех маршрутов
    pub bindings: Vec<String>,
    pub prefetch: Option<PrefetchConfig>,
    pub reconnect_interval_secs: u64,
    /// Таймаут ожидания ответа; `None` = ждать бесконечно
    pub reply_timeout_ms: Option<u64>,
    /// Префикс имени приватной очереди ответов
    pub reply_queue_prefix: String,
}

/// Ограничение числа неподтверждённых сообщений.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    pub count: u16,
    #[serde(default)]
    pub global: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RpcConfig {
    pub const DEFAULT_EXCHANGE: &'static str = "courier";
    pub const DEFAULT_REPLY_QUEUE_PREFIX: &'static str = "courier";

    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_exchange(
        mut self,
        exchange: impl Into<String>,
    ) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_queue(
        mut self,
        queue: impl Into<String>,
    ) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_bindings<I, S>(
        mut self,
        bindings: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bindings = bindings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prefetch(
        mut self,
        count: u16,
        global: bool,
    ) -> Self {
        self.prefetch = Some(PrefetchConfig { count, global });
        self
    }

    pub fn with_reconnect_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.reconnect_interval_secs = interval.as_secs();
        self
    }

    pub fn with_reply_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.reply_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_reply_queue_prefix(
        mut self,
        prefix: impl Into<String>,
    ) -> Self {
        self.reply_queue_prefix = prefix.into();
        self
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            reconnect_interval: self.reconnect_interval(),
        }
    }

    /// Проверяет согласованность настроек.
    pub fn validate(&self) -> CourierResult<()> {
        ensure!(
            !self.urls.is_empty() && self.urls.iter().all(|u| !u.trim().is_empty()),
            ConfigError::Missing {
                field: "urls".to_string(),
            }
        );
        ensure!(
            !self.exchange.trim().is_empty(),
            ConfigError::Missing {
                field: "exchange".to_string(),
            }
        );
        if let Some(queue) = &self.queue {
            ensure!(
                !queue.trim().is_empty(),
                ConfigError::Invalid {
                    field: "queue".to_string(),
                    reason: "must not be empty when set".to_string(),
                }
            );
        }
        if let Some(prefetch) = self.prefetch {
            ensure!(
                prefetch.count > 0,
                ConfigError::Invalid {
                    field: "prefetch.count".to_string(),
                    reason: "must be greater than zero".to_string(),
                }
            );
        }
        ensure!(
            self.reply_timeout_ms != Some(0),
            ConfigError::Invalid {
                field: "reply_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            }
        );
        ensure!(
            !self.reply_queue_prefix.trim().is_empty(),
            ConfigError::Missing {
                field: "reply_queue_prefix".to_string(),
            }
        );
        Ok(())
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            exchange: Self::DEFAULT_EXCHANGE.to_string(),
            queue: None,
            bindings: Vec::new(),
            prefetch: None,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL.as_secs(),
            reply_timeout_ms: None,
            reply_queue_prefix: Self::DEFAULT_REPLY_QUEUE_PREFIX.to_string(),
        }
    }
}
