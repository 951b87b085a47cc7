use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClassroomError, Result};

pub struct Config {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub rooms: RoomConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Websocket liveness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How often the server pings each socket
    pub ping_interval: Duration,
    /// A socket with no inbound frame (pongs included) for this long is closed
    pub idle_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct RoomConfig {
    /// How long an empty room is kept before teardown
    pub grace_period: Duration,
}

pub struct CatalogConfig {
    pub materials_dir: PathBuf,
    /// Material bound to rooms created lazily by a join that names none
    pub default_material_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("SERVER_PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port.parse().map_err(|_| {
            ClassroomError::InvalidConfiguration(format!("SERVER_PORT must be a port number, got {port:?}"))
        })?;

        let grace_period = seconds_from_env("ROOM_GRACE_PERIOD_SECS", 300)?;
        let ping_interval = seconds_from_env("WS_PING_INTERVAL_SECS", 20)?;
        let idle_timeout = seconds_from_env("WS_IDLE_TIMEOUT_SECS", 60)?;
        if ping_interval.is_zero() || idle_timeout <= ping_interval {
            return Err(ClassroomError::InvalidConfiguration(format!(
                "WS_IDLE_TIMEOUT_SECS ({}) must exceed WS_PING_INTERVAL_SECS ({}), which must be positive",
                idle_timeout.as_secs(),
                ping_interval.as_secs()
            )));
        }

        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(ClassroomError::InvalidConfiguration(format!(
                    "LOG_FORMAT must be \"text\" or \"json\", got {other:?}"
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            connection: ConnectionConfig {
                ping_interval,
                idle_timeout,
            },
            rooms: RoomConfig { grace_period },
            catalog: CatalogConfig {
                materials_dir: env::var("MATERIALS_DIR")
                    .unwrap_or_else(|_| "./static/materials".to_string())
                    .into(),
                default_material_id: env::var("DEFAULT_MATERIAL_ID")
                    .ok()
                    .filter(|id| !id.is_empty()),
            },
            logging: LoggingConfig { format },
        })
    }

    /// Socket address to listen on. `SERVER_HOST` is an IP address, or
    /// `localhost`.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let host = match self.server.host.as_str() {
            "" => "0.0.0.0",
            "localhost" => "127.0.0.1",
            host => host,
        };
        let ip: IpAddr = host.parse().map_err(|_| {
            ClassroomError::InvalidConfiguration(format!(
                "SERVER_HOST must be an IP address or localhost, got {:?}",
                self.server.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

fn seconds_from_env(key: &str, default: u64) -> Result<Duration> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map(Duration::from_secs)
        .map_err(|_| ClassroomError::InvalidConfiguration(format!("{key} must be a number of seconds, got {raw:?}")))
}
