use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::Route;

/// Таблица маршрутов сервиса.
///
/// Заполняется при построении сервиса, но допускает позднюю регистрацию
/// (только добавление). При повторной регистрации топика побеждает первый
/// маршрут.
#[derive(Default)]
pub struct RouteTable {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    routes: HashMap<Arc<str>, Route>,
    /// Порядок регистрации (для детерминированных привязок)
    order: Vec<Arc<str>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет маршрут.
    ///
    /// Возвращает `false`, если топик уже занят: существующий маршрут
    /// остаётся, новый отбрасывается.
    pub fn register(
        &self,
        route: Route,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.routes.contains_key(&route.topic) {
            warn!(topic = %route.topic, "route already registered, keeping the first one");
            return false;
        }
        debug!(topic = %route.topic, kind = ?route.kind, "route registered");
        inner.order.push(route.topic.clone());
        inner.routes.insert(route.topic.clone(), route);
        true
    }

    /// Находит маршрут по точному совпадению routing key.
    pub fn resolve(
        &self,
        routing_key: &str,
    ) -> Option<Route> {
        self.inner.read().routes.get(routing_key).cloned()
    }

    pub fn contains(
        &self,
        topic: &str,
    ) -> bool {
        self.inner.read().routes.contains_key(topic)
    }

    /// Топики в порядке регистрации.
    pub fn topics(&self) -> Vec<String> {
        self.inner.read().order.iter().map(|t| t.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
