use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use lib_weather::HubConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "server_weather.conf";

#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Weather reading ingestion server with a live subscriber feed", version)]
pub struct Config {
    #[clap(long, env = "WEATHER_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "WEATHER_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, value_enum, env = "WEATHER_STORE", help = "Where readings are kept.")]
    pub store: Option<StoreKind>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL (store = postgres).")]
    pub database_url: Option<String>,

    #[clap(long, env = "WEATHER_DB_MAX_CONNECTIONS", help = "Size of the database connection pool.")]
    pub db_max_connections: Option<usize>,

    #[clap(long, env = "WEATHER_DATA_FILE", help = "Batch file ingested at startup when present.")]
    pub data_file: Option<PathBuf>,

    #[clap(long, env = "WEATHER_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "WEATHER_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "WEATHER_HUB_QUEUE_CAPACITY", help = "Readings buffered for live delivery before new ones are dropped.")]
    pub hub_queue_capacity: Option<usize>,

    #[clap(long, env = "WEATHER_WRITE_WAIT_SECONDS", help = "Deadline for a single write to a subscriber.")]
    pub write_wait_seconds: Option<u64>,

    #[clap(long, env = "WEATHER_PONG_WAIT_SECONDS", help = "Silence allowed from a subscriber before it is dropped.")]
    pub pong_wait_seconds: Option<u64>,

    #[clap(long, env = "WEATHER_MAX_MESSAGE_SIZE", help = "Largest inbound frame accepted from a subscriber, in bytes.")]
    pub max_message_size: Option<usize>,

    #[clap(long, env = "WEATHER_SHUTDOWN_GRACE_SECONDS", help = "How long shutdown waits for the hub to release subscribers.")]
    pub shutdown_grace_seconds: Option<u64>,
}

/// Fully resolved settings the server runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub data_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub hub: HubConfig,
    pub shutdown_grace: Duration,
    /// The configuration file that was merged in, if one was found.
    pub config_file: Option<PathBuf>,
}

impl Config {
    fn defaults() -> Config {
        let hub = HubConfig::default();
        Config {
            port: Some(8080),
            store: Some(StoreKind::Postgres),
            db_max_connections: Some(16),
            data_file: Some(PathBuf::from("data/weather.dat")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            hub_queue_capacity: Some(hub.queue_capacity),
            write_wait_seconds: Some(hub.write_wait.as_secs()),
            pong_wait_seconds: Some(hub.pong_wait.as_secs()),
            max_message_size: Some(hub.max_message_size),
            shutdown_grace_seconds: Some(10),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            store: other.store.or(self.store),
            database_url: other.database_url.or(self.database_url),
            db_max_connections: other.db_max_connections.or(self.db_max_connections),
            data_file: other.data_file.or(self.data_file),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            hub_queue_capacity: other.hub_queue_capacity.or(self.hub_queue_capacity),
            write_wait_seconds: other.write_wait_seconds.or(self.write_wait_seconds),
            pong_wait_seconds: other.pong_wait_seconds.or(self.pong_wait_seconds),
            max_message_size: other.max_message_size.or(self.max_message_size),
            shutdown_grace_seconds: other.shutdown_grace_seconds.or(self.shutdown_grace_seconds),
        }
    }

    fn resolve(self, config_file: Option<PathBuf>) -> Result<Settings> {
        let store = self.store.unwrap_or(StoreKind::Postgres);
        if store == StoreKind::Postgres && self.database_url.is_none() {
            bail!("store = postgres needs a database URL (--database-url or DATABASE_URL)");
        }

        let pong_wait = Duration::from_secs(self.pong_wait_seconds.unwrap_or(60));
        if pong_wait.is_zero() {
            bail!("pong_wait_seconds must be positive");
        }
        let mut hub = HubConfig::with_pong_wait(pong_wait);
        if let Some(capacity) = self.hub_queue_capacity {
            if capacity == 0 {
                bail!("hub_queue_capacity must be positive");
            }
            hub.queue_capacity = capacity;
        }
        if let Some(secs) = self.write_wait_seconds {
            hub.write_wait = Duration::from_secs(secs);
        }
        if let Some(size) = self.max_message_size {
            hub.max_message_size = size;
        }

        Ok(Settings {
            port: self.port.unwrap_or(8080),
            store,
            database_url: self.database_url,
            db_max_connections: self.db_max_connections.unwrap_or(16),
            data_file: self.data_file.unwrap_or_else(|| PathBuf::from("data/weather.dat")),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            hub,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds.unwrap_or(10)),
            config_file,
        })
    }
}

/// Loads `.env`, then resolves defaults < config file < environment/CLI.
pub fn load_config() -> Result<Settings> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    load_config_from(std::env::args_os())
}

pub fn load_config_from<I, T>(args: I) -> Result<Settings>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // clap handles both env vars and CLI args; --help and bad flags exit here.
    let cli = Config::try_parse_from(args).unwrap_or_else(|e| e.exit());
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = Config::defaults();
    let mut loaded = None;
    if config_file_path.exists() {
        let raw = fs::read_to_string(&config_file_path)
            .with_context(|| format!("failed to read config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", config_file_path.display()))?;
        current = current.merge(file_config);
        loaded = Some(config_file_path);
    }

    current.merge(cli).resolve(loaded)
}
