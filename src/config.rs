//! Configuration types for the embeddable server.
//! Construct a Config literally or load one from a file/environment.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Server configuration.
///
/// All fields have defaults, so `Config::default()` yields a server on
/// `0.0.0.0:8080` serving the `html` directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub ip: String,
    /// Public files root for the static tier, relative to `relative_root`.
    pub files_dir: String,
    /// Prefix prepended to relative source paths (document routes, API dirs).
    pub relative_root: String,
    /// Headers applied to every response.
    pub global_headers: HashMap<String, String>,
    /// Cache-control allow-list by file extension.
    pub basic_cache_control: CacheControlConfig,
    /// Enable the websocket messaging channel on the same listening socket.
    pub ws: bool,
    /// Logging options.
    pub logging: LoggingConfig,
}

/// Extensions that receive a long-lived `Cache-Control` header, and for how
/// long.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheControlConfig {
    pub exts: Vec<String>,
    pub seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: "spam", "info", "warn", or "error".
    pub level: String,
    /// Log file path (stdout/stderr if not set).
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            ip: "0.0.0.0".to_string(),
            files_dir: "html".to_string(),
            relative_root: String::new(),
            global_headers: HashMap::new(),
            basic_cache_control: CacheControlConfig::default(),
            ws: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CacheControlConfig {
    fn default() -> Self {
        Self {
            exts: [
                "ttf",
                "svg",
                "gif",
                "webmanifest",
                "ico",
                "png",
                "jpg",
                "jpeg",
                "PNG",
                "JPG",
                "JPEG",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            seconds: 604_800,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file (without extension), layered with
    /// `PINION_`-prefixed environment variables. The file is optional.
    pub fn load_from(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("PINION"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|e| Error::BindAddress(format!("{}:{}: {e}", self.ip, self.port)))
    }
}
