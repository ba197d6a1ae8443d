use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
};

use courier_error::{CourierResult, RpcError};
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::guid::CorrelationId;

/// Реестр ожидающих вызовов: correlation id → единственный ожидающий.
///
/// `register` и `fulfil` атомарны друг относительно друга: обе операции
/// работают через шард `DashMap`, поэтому для одного id в любой момент есть
/// не больше одного ожидающего, и забрать его может только один `fulfil`.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, Waiter>,
    next_token: AtomicU64,
}

struct Waiter {
    /// Отличает эту регистрацию от более поздней с тем же id
    token: u64,
    tx: oneshot::Sender<CourierResult<Value>>,
}

/// Одноразовый handle ожидания ответа.
///
/// Завершается результатом `fulfil` или ошибкой `Abandoned`, если запись
/// удалили без ответа (`cancel`, `clear`). Если handle уничтожить до
/// завершения, его запись удаляется из реестра.
#[must_use = "the reply is lost unless the handle is awaited"]
pub struct PendingReply {
    id: CorrelationId,
    token: u64,
    rx: oneshot::Receiver<CourierResult<Value>>,
    registry: Weak<CorrelationRegistry>,
    settled: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует ожидающего для `id`.
    ///
    /// Если для `id` уже есть ожидающий, возвращает
    /// `RpcError::DuplicateCorrelationId` и существующую запись не трогает.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
    ) -> CourierResult<PendingReply> {
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => Err(RpcError::DuplicateCorrelationId {
                correlation_id: id.to_string(),
            }
            .into()),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(Waiter { token, tx });
                trace!(correlation_id = %id, "pending call registered");
                Ok(PendingReply {
                    id,
                    token,
                    rx,
                    registry: Arc::downgrade(self),
                    settled: false,
                })
            }
        }
    }

    /// Завершает ожидающего для `id` содержимым ответа.
    ///
    /// Пустое тело превращается в `RpcError::NoReplyContent`, невалидный
    /// JSON в `RpcError::InvalidReply`. Возвращает `false`, если для `id`
    /// никто не ждёт (поздний, повторный или чужой ответ).
    pub fn fulfil(
        &self,
        id: &str,
        payload: &[u8],
    ) -> bool {
        let Some((key, waiter)) = self.pending.remove(id) else {
            trace!(correlation_id = id, "reply for unknown correlation id discarded");
            return false;
        };
        let result = decode_reply(&key, payload);
        // ожидающий мог уйти между remove и send: ответ всё равно считается
        // использованным
        let _ = waiter.tx.send(result);
        true
    }

    /// Удаляет запись без ответа. Ожидающий получит `Abandoned`.
    pub fn cancel(
        &self,
        id: &str,
    ) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Удаляет все записи. Все ожидающие получат `Abandoned`.
    pub fn clear(&self) {
        self.pending.clear();
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PendingReply {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }
}

fn decode_reply(
    id: &CorrelationId,
    payload: &[u8],
) -> CourierResult<Value> {
    if payload.is_empty() {
        return Err(RpcError::NoReplyContent {
            correlation_id: id.to_string(),
        }
        .into());
    }
    serde_json::from_slice(payload).map_err(|e| {
        RpcError::InvalidReply {
            correlation_id: id.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Future и Drop
////////////////////////////////////////////////////////////////////////////////

impl Future for PendingReply {
    type Output = CourierResult<Value>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.settled = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.settled = true;
                Poll::Ready(Err(RpcError::Abandoned {
                    correlation_id: this.id.to_string(),
                }
                .into()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            let token = self.token;
            if registry
                .pending
                .remove_if(&self.id, |_, w| w.token == token)
                .is_some()
            {
                trace!(correlation_id = %self.id, "pending call dropped before reply");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_error::StatusCode;
    use serde_json::json;

    use super::*;

    fn registry() -> Arc<CorrelationRegistry> {
        Arc::new(CorrelationRegistry::new())
    }

    /// Тест проверяет, что fulfil завершает ровно своего ожидающего.
    #[tokio::test]
    async fn test_fulfil_resolves_only_matching_call() {
        let reg = registry();
        let a = reg.register(CorrelationId::from("a")).unwrap();
        let b = reg.register(CorrelationId::from("b")).unwrap();

        assert!(reg.fulfil("b", br#"{"v":2}"#));
        assert_eq!(b.await.unwrap(), json!({"v": 2}));
        assert!(reg.contains("a"));

        assert!(reg.fulfil("a", br#"{"v":1}"#));
        assert_eq!(a.await.unwrap(), json!({"v": 1}));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_fulfil_unknown_id_is_noop() {
        let reg = registry();
        assert!(!reg.fulfil("nobody", b"{}"));
        assert!(reg.is_empty());
    }

    /// Тест проверяет, что повторный ответ отбрасывается.
    #[tokio::test]
    async fn test_duplicate_reply_discarded() {
        let reg = registry();
        let pending = reg.register(CorrelationId::from("x")).unwrap();
        assert!(reg.fulfil("x", b"1"));
        assert!(!reg.fulfil("x", b"2"));
        assert_eq!(pending.await.unwrap(), json!(1));
    }

    /// Тест проверяет, что пустое тело даёт ошибку, а не зависание.
    #[tokio::test]
    async fn test_empty_payload_is_no_reply_content() {
        let reg = registry();
        let pending = reg.register(CorrelationId::from("e")).unwrap();
        reg.fulfil("e", b"");
        let err = pending.await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NoReplyContent);
        assert_eq!(err.to_string(), "No RPC result for correlation id e");
    }

    #[tokio::test]
    async fn test_invalid_json_is_invalid_reply() {
        let reg = registry();
        let pending = reg.register(CorrelationId::from("j")).unwrap();
        reg.fulfil("j", b"{not json");
        let err = pending.await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidReply);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let reg = registry();
        let _first = reg.register(CorrelationId::from("d")).unwrap();
        let err = reg.register(CorrelationId::from("d")).err().unwrap();
        assert_eq!(err.status_code(), StatusCode::DuplicateCorrelationId);
        assert_eq!(reg.len(), 1);
    }

    /// Тест проверяет очистку записи при отказе от ожидания.
    #[test]
    fn test_drop_removes_entry() {
        let reg = registry();
        let pending = reg.register(CorrelationId::from("gone")).unwrap();
        assert!(reg.contains("gone"));
        drop(pending);
        assert!(!reg.contains("gone"));
    }

    /// Тест проверяет, что старый handle не удаляет новую регистрацию
    /// того же id.
    #[test]
    fn test_stale_handle_keeps_newer_registration() {
        let reg = registry();
        let old = reg.register(CorrelationId::from("r")).unwrap();
        assert!(reg.cancel("r"));
        let _new = reg.register(CorrelationId::from("r")).unwrap();
        drop(old);
        assert!(reg.contains("r"));
    }

    #[tokio::test]
    async fn test_cancel_and_clear_abandon_waiters() {
        let reg = registry();
        let a = reg.register(CorrelationId::from("a")).unwrap();
        let b = reg.register(CorrelationId::from("b")).unwrap();
        reg.cancel("a");
        reg.clear();
        for pending in [a, b] {
            let err = pending.await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RpcError>(),
                Some(RpcError::Abandoned { .. })
            ));
        }
        assert!(reg.is_empty());
    }

    /// Тест проверяет конкурентные register/fulfil без перепутанных ответов.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_fulfil() {
        let reg = registry();
        let mut waiters = Vec::new();
        for i in 0..200u32 {
            let pending = reg.register(CorrelationId::generate()).unwrap();
            let id = pending.id().to_string();
            waiters.push((i, pending));
            let reg = reg.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(u64::from(i % 7))).await;
                reg.fulfil(&id, i.to_string().as_bytes());
            });
        }
        for (i, pending) in waiters {
            assert_eq!(pending.await.unwrap(), json!(i));
        }
        assert!(reg.is_empty());
    }
}
