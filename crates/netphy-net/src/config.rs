//! Runtime configuration.
//!
//! Values start from built-in defaults, are optionally overlaid by a JSON
//! file named in `NETPHY_CONFIG`, then by individual `NETPHY_*` variables.

use crate::protocol::{DEFAULT_PASSWORD, SERVER_PORT};
use crate::transport::ListenOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the server listens on
    pub port: u16,
    /// Interface the server binds
    pub bind_addr: IpAddr,
    /// Server a client connects to
    pub server_addr: SocketAddr,
    pub password: String,
    pub max_connections: usize,
    /// Grace period for in-flight sends when a session shuts down
    pub shutdown_drain_ms: u64,
    pub map_width: u32,
    pub map_height: u32,
    pub x_spacing: f64,
    pub y_spacing: f64,
    /// Lines kept in the console buffer
    pub console_lines: usize,
    pub ticks_per_second: u32,
    pub players: Vec<String>,
    /// Fixed seed for reproducible owner generation
    pub seed: Option<u64>,
    /// Map file used by the editor's save and load commands
    pub map_path: Option<PathBuf>,
    pub banned: Vec<IpAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: SERVER_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), SERVER_PORT),
            password: DEFAULT_PASSWORD.to_string(),
            max_connections: 4,
            shutdown_drain_ms: 300,
            map_width: 64,
            map_height: 32,
            x_spacing: 1.5,
            y_spacing: 1.732050807,
            console_lines: 20,
            ticks_per_second: 60,
            players: ["Dan", "Abe", "Tim", "Mickey", "Zen"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            seed: None,
            map_path: None,
            banned: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `var` to look up environment variables
    pub fn load_with<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match var("NETPHY_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };

        if let Some(v) = var("NETPHY_PORT") {
            config.port = parse("NETPHY_PORT", &v)?;
        }
        if let Some(v) = var("NETPHY_BIND_ADDR") {
            config.bind_addr = parse("NETPHY_BIND_ADDR", &v)?;
        }
        if let Some(v) = var("NETPHY_SERVER_ADDR") {
            config.server_addr = parse("NETPHY_SERVER_ADDR", &v)?;
        }
        if let Some(v) = var("NETPHY_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = var("NETPHY_MAX_CONNECTIONS") {
            config.max_connections = parse("NETPHY_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = var("NETPHY_SEED") {
            config.seed = Some(parse("NETPHY_SEED", &v)?);
        }
        if let Some(v) = var("NETPHY_MAP") {
            config.map_path = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }

    /// Duration of one game tick
    pub fn tick(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            addr: SocketAddr::new(self.bind_addr, self.port),
            password: self.password.clone(),
            max_connections: self.max_connections,
            banned: self.banned.clone(),
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
