//! CLI Courier
//!
//! Поднимает сервис и клиента на встроенном брокере, гоняет через них
//! запросы и уведомления и печатает счётчики. Удобно для проверки
//! конфигурации и формата логов.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Map, Value as ConfigValue};
use courier::{config::Settings, init_logging, MemoryBroker, RpcService};
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("COURIER_GIT_COMMIT"), ")"))]
#[command(about = "Courier - request/reply messaging over a topic broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Файл конфигурации (toml, yaml, json)
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,
    /// Адрес брокера (например `memory://local`); можно указать несколько раз.
    /// Перекрывает `rpc.urls` из файла и окружения
    #[arg(short, long = "url")]
    urls: Vec<String>,
    /// Имя topic exchange
    #[arg(long)]
    exchange: Option<String>,
    /// Уровень или директива фильтра логов
    #[arg(long)]
    log_level: Option<String>,
    /// Формат логов: pretty, compact, json
    #[arg(long)]
    log_format: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Эхо-запросы и уведомление через встроенный брокер
    Demo {
        /// Количество запросов
        #[arg(short = 'n', long, default_value = "3")]
        requests: usize,
        /// Таймаут ответа в миллисекундах
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,
    },
    /// Печатает итоговую конфигурацию
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Demo {
            requests,
            timeout_ms,
        } => {
            let logging =
                init_logging(settings.logging.clone()).context("failed to initialize logging")?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                commit = env!("COURIER_GIT_COMMIT"),
                built = env!("COURIER_BUILD_TIME"),
                "courier starting"
            );
            let result = run_demo(settings, requests, Duration::from_millis(timeout_ms)).await;
            logging.shutdown();
            result
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut overrides: Map<String, ConfigValue> = Map::new();
    if !cli.urls.is_empty() {
        overrides.insert("rpc.urls".to_string(), ConfigValue::from(cli.urls.clone()));
    }
    if let Some(exchange) = &cli.exchange {
        overrides.insert("rpc.exchange".to_string(), ConfigValue::from(exchange.as_str()));
    }
    if let Some(level) = &cli.log_level {
        overrides.insert("logging.level".to_string(), ConfigValue::from(level.as_str()));
    }
    if let Some(format) = &cli.log_format {
        overrides.insert("logging.format".to_string(), ConfigValue::from(format.as_str()));
    }
    Settings::load_with_overrides(cli.config.as_deref(), overrides)
        .context("failed to load settings")
}

async fn run_demo(
    settings: Settings,
    requests: usize,
    timeout: Duration,
) -> Result<()> {
    let broker = Arc::new(MemoryBroker::new());

    let server_config = settings
        .rpc
        .clone()
        .with_queue(settings.rpc.queue.clone().unwrap_or_else(|| "courier.demo".to_string()));
    let server = RpcService::builder(server_config)
        .route("demo.echo", |payload| async move { Ok(Some(payload)) })
        .notification("demo.audit", |payload| async move {
            info!(%payload, "audit notification received");
            Ok(None)
        })
        .build(broker.clone())?;
    server.start().await.context("failed to start demo service")?;

    let mut client_config = settings.rpc;
    client_config.queue = None;
    let client = RpcService::builder(client_config).build(broker)?;

    for seq in 0..requests {
        let reply = client
            .send_with_timeout("demo.echo", json!({ "seq": seq }), timeout)
            .await;
        match reply {
            Ok(value) => info!(seq, reply = %value, "echo reply"),
            Err(e) => warn!(seq, error = %e, "echo request failed"),
        }
    }
    client
        .notify("demo.audit", json!({ "requests": requests }))
        .await?;
    // уведомлению нужно время дойти до обработчика
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report: Value = json!({
        "client": client.stats(),
        "service": server.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    client.close().await?;
    server.close().await?;
    Ok(())
}
