//! Таблица маршрутов: топик → обработчик.
//!
//! Поиск выполняется по точному совпадению routing key. Wildcard-шаблоны
//! работают только на стороне брокера (binding keys), а не здесь.

mod handler;
mod table;

pub use handler::{FnHandler, Route, RouteHandler, RouteKind};
pub use table::RouteTable;
