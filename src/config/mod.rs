//! Конфигурация: значения по умолчанию, файл, переменные окружения.

mod rpc;
mod settings;

pub use rpc::{PrefetchConfig, RpcConfig};
pub use settings::{Settings, ENV_PREFIX};
