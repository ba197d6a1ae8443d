//! Внутрипроцессный брокер с семантикой AMQP-подобных exchange.
//!
//! Используется в тестах и демо-бинарнике. Поддерживает topic/direct/fanout
//! exchange, конкурирующих потребителей одной очереди, эксклюзивные очереди,
//! удаляемые вместе с соединением, и имитацию обрыва связи с последующим
//! переподключением.

mod broker;
mod channel;
mod connection;
mod topic;

pub use broker::MemoryBroker;
pub use channel::MemoryChannel;
pub use connection::MemoryConnection;
pub use topic::topic_matches;

/// Схема адресов внутрипроцессного брокера.
pub const MEMORY_SCHEME: &str = "memory://";
