use std::{fs, path::PathBuf};

use courier_error::{bail, ConfigError, CourierResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Многострочный, для разработки
    Pretty,
    /// Одна строка на событие
    #[default]
    Compact,
    /// JSON на строку, для сборщиков логов
    Json,
}

/// Настройки логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Директива фильтра: `info`, `courier=debug,warn` и т.п.
    pub level: String,
    pub format: LogFormat,
    /// Вывод в stdout
    pub console: bool,
    pub ansi: bool,
    pub with_target: bool,
    /// Файл с ежедневной ротацией; `None` = не писать в файл
    pub file: Option<FileLogConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    pub dir: PathBuf,
    /// Имя файла до суффикса даты
    pub prefix: String,
    /// Формат файла; по умолчанию JSON
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Директива для `EnvFilter`.
    pub fn filter_directive(&self) -> &str {
        self.level.trim()
    }

    pub fn validate(&self) -> CourierResult<()> {
        if let Err(e) = EnvFilter::try_new(self.filter_directive()) {
            bail!(ConfigError::Invalid {
                field: "logging.level".to_string(),
                reason: e.to_string(),
            });
        }
        if let Some(file) = &self.file {
            if file.prefix.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: "logging.file.prefix".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включена запись в файл.
    pub fn ensure_log_dir(&self) -> CourierResult<()> {
        if let Some(file) = &self.file {
            fs::create_dir_all(&file.dir)?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            console: true,
            ansi: true,
            with_target: true,
            file: None,
        }
    }
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            prefix: "courier.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filter_directive() {
        let mut cfg = LoggingConfig::default();
        cfg.validate().unwrap();

        cfg.level = "courier=debug,warn".to_string();
        cfg.validate().unwrap();

        cfg.level = "courier=notalevel".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_ensure_log_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let cfg = LoggingConfig {
            file: Some(FileLogConfig {
                dir: dir.clone(),
                ..FileLogConfig::default()
            }),
            ..LoggingConfig::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let f: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(f, LogFormat::Pretty);
    }
}
