//! Configuration management for the chunk upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Prepended to the session id to form the object key
    pub key_prefix: String,
}

/// Session registry backend
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub connect_timeout: Duration,
    /// How often the in-process backend evicts expired keys
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Root of the per-session staging directories
    pub staging_dir: PathBuf,
    /// Root of the per-session final artifact directories
    pub final_dir: PathBuf,
    pub session_ttl: Duration,
    pub cookie_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
                key_prefix: String::new(),
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                url: "redis://127.0.0.1:6379/0".to_string(),
                connect_timeout: Duration::from_secs(20),
                sweep_interval: Duration::from_millis(1000),
            },
            uploads: UploadConfig {
                staging_dir: PathBuf::from("./data/staging"),
                final_dir: PathBuf::from("./data/final"),
                session_ttl: Duration::from_secs(3600),
                cookie_name: "session_id".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT")?,
                bucket: env::var("S3_BUCKET")?,
                access_key: env::var("S3_ACCESS_KEY")?,
                secret_key: env::var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
                key_prefix: env::var("S3_KEY_PREFIX").unwrap_or_default(),
            },
            store: StoreConfig {
                backend: match env::var("STORE_BACKEND").unwrap_or_default().as_str() {
                    "redis" => StoreBackend::Redis,
                    _ => StoreBackend::Memory,
                },
                url: env::var("REDIS_URL").unwrap_or(defaults.store.url),
                connect_timeout: Duration::from_secs(parse_or(
                    "STORE_CONNECT_TIMEOUT_SECS",
                    defaults.store.connect_timeout.as_secs(),
                )),
                sweep_interval: Duration::from_millis(parse_or(
                    "MEMORY_SWEEP_INTERVAL_MS",
                    defaults.store.sweep_interval.as_millis() as u64,
                )),
            },
            uploads: UploadConfig {
                staging_dir: env::var("FOLDER_TEMP_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.uploads.staging_dir),
                final_dir: env::var("FOLDER_PERM_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.uploads.final_dir),
                session_ttl: Duration::from_secs(parse_or(
                    "SESSION_TTL_SECS",
                    defaults.uploads.session_ttl.as_secs(),
                )),
                cookie_name: env::var("SESSION_COOKIE_NAME")
                    .unwrap_or(defaults.uploads.cookie_name),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
