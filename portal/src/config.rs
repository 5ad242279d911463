use std::{fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_UPSTREAM_BASE: &str = "https://api.servicem8.com/api_1.0";

/// Command line options for the portal server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Storage backend (sqlite or json).
    #[arg(long)]
    pub store: Option<StoreBackend>,
    /// Directory holding the portal database.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base URL of the field-service API.
    pub upstream_base: String,
    /// Bearer token for the field-service API; empty when unconfigured.
    pub upstream_token: String,
    /// Forward `customer_email` on the bookings list as an upstream filter.
    pub forward_customer_filter: bool,
    pub store: StoreBackend,
    /// Directory holding the portal database.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("upstream_base", &self.upstream_base)
            .field("upstream_token", &"<redacted>")
            .field("forward_customer_filter", &self.forward_customer_filter)
            .field("store", &self.store)
            .field("data_dir", &self.data_dir)
            .field("logging_enabled", &self.logging_enabled)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    upstream: FileUpstream,
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize, Default)]
struct FileUpstream {
    base_url: Option<String>,
    token: Option<String>,
    #[serde(default)]
    forward_customer_filter: bool,
}

#[derive(Deserialize, Default)]
struct FileStore {
    backend: Option<StoreBackend>,
    data_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_port() -> u16 {
    4000
}

fn default_logging() -> bool {
    true
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| env_var("PORTAL_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/portal.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut upstream_base = file_cfg
            .upstream
            .base_url
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE.to_string());
        let mut upstream_token = file_cfg.upstream.token.unwrap_or_default();
        let mut forward_customer_filter = file_cfg.upstream.forward_customer_filter;
        let mut store = file_cfg.store.backend.unwrap_or_default();
        let mut data_dir = file_cfg.store.data_dir;

        // environment overrides
        if let Some(p) = env_var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            port = p;
        }
        if let Some(l) = env_var("PORTAL_LOGGING").and_then(|l| l.parse::<bool>().ok()) {
            logging = l;
        }
        if let Some(base) = env_var("SERVICEM8_BASE") {
            upstream_base = base;
        }
        if let Some(token) = env_var("SERVICEM8_API_TOKEN") {
            upstream_token = token;
        }
        if let Some(f) =
            env_var("PORTAL_FORWARD_CUSTOMER_FILTER").and_then(|f| f.parse::<bool>().ok())
        {
            forward_customer_filter = f;
        }
        if let Some(s) = env_var("PORTAL_STORE") {
            store = s.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(d) = env_var("DATA_DIR") {
            data_dir = Some(PathBuf::from(d));
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(s) = cli.store {
            store = s;
        }
        if let Some(d) = &cli.data_dir {
            data_dir = Some(d.clone());
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Some(b) = env_var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        Ok(Self {
            bind,
            upstream_base: upstream_base.trim_end_matches('/').to_string(),
            upstream_token,
            forward_customer_filter,
            store,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            logging_enabled: logging,
        })
    }
}

/// Determine the default data directory for the portal.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "portal", "portal")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./portal_data"))
}
