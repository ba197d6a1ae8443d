use std::path::Path;

use config::{Config, Environment, File, Map, Value};
use courier_error::{CourierResult, ResultExt};
use serde::{Deserialize, Serialize};

use super::RpcConfig;
use crate::logging::LoggingConfig;

/// Префикс переменных окружения: `COURIER_RPC__URLS`, `COURIER_LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "COURIER";

/// Полная конфигурация процесса.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Значения по умолчанию, переопределённые окружением.
    pub fn load() -> CourierResult<Self> {
        Self::build(None, environment(), Map::new())
    }

    /// Файл конфигурации (toml/yaml/json по расширению), затем окружение.
    pub fn load_from(path: impl AsRef<Path>) -> CourierResult<Self> {
        Self::build(Some(path.as_ref()), environment(), Map::new())
    }

    /// Файл (если задан), окружение, затем явные переопределения
    /// (`"rpc.exchange"`, `"logging.level"`, ...), например из аргументов CLI.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: Map<String, Value>,
    ) -> CourierResult<Self> {
        Self::build(path, environment(), overrides)
    }

    fn build(
        path: Option<&Path>,
        env: Environment,
        overrides: Map<String, Value>,
    ) -> CourierResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(env);
        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }
        let settings: Self = builder
            .build()?
            .try_deserialize()
            .context("failed to read settings")?;
        settings.rpc.validate()?;
        Ok(settings)
    }
}

/// Источник окружения: `__` разделяет уровни, списки через запятую.
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("rpc.urls")
        .with_list_parse_key("rpc.bindings")
        .try_parsing(true)
}
