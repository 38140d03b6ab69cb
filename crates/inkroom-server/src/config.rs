use std::env;

use thiserror::Error;

use crate::rooms::DEFAULT_CHANNEL_CAPACITY;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3000)
    pub port: u16,
    /// Room joined when the `room` query parameter is absent (default: lobby)
    pub default_room: String,
    /// Broadcast channel capacity per room (default: 256)
    pub channel_capacity: usize,
    /// CORS allowed origins; empty means any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid PORT environment variable: {0:?}")]
    InvalidPort(String),
    #[error("Invalid CHANNEL_CAPACITY environment variable: {0:?}")]
    InvalidChannelCapacity(String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => defaults.port,
        };

        let default_room = lookup("DEFAULT_ROOM")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.default_room);

        let channel_capacity = match lookup("CHANNEL_CAPACITY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidChannelCapacity(raw)),
            },
            None => defaults.channel_capacity,
        };

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "*")
            .collect();

        Ok(Config {
            host,
            port,
            default_room,
            channel_capacity,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            default_room: "lobby".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            cors_origins: Vec::new(),
        }
    }
}
