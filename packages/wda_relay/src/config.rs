use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

// =============================================================================
// Unified config (figment-deserialized from defaults / config file / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   relay.toml:      [upstream]
//                    mjpeg_url = "http://10.0.0.2:9100"
//
//   env var:         WDA_RELAY_UPSTREAM__MJPEG_URL=http://10.0.0.2:9100
//
//   CLI flag:        --mjpeg-url http://10.0.0.2:9100   (highest priority)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub upstream: UpstreamFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// The WebDriverAgent backend every non-stream request is forwarded to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_wda_url")]
    pub wda_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            wda_url: default_wda_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// The MJPEG source shared by all screen subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamFileConfig {
    #[serde(default = "default_mjpeg_url")]
    pub mjpeg_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Delay before reopening a failed upstream while subscribers remain.
    /// 0 disables automatic retry.
    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl Default for UpstreamFileConfig {
    fn default() -> Self {
        Self {
            mjpeg_url: default_mjpeg_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            retry_delay_ms: 0,
        }
    }
}

/// Per-client WebSocket tunables (lives under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: default_buffer_chunks(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8200
}
fn default_wda_url() -> String {
    "http://localhost:8100".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_body_mb() -> usize {
    16
}
fn default_mjpeg_url() -> String {
    "http://localhost:9100".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_buffer_chunks() -> usize {
    16
}
fn default_write_timeout_ms() -> u64 {
    2000
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub wda_url: Option<String>,
    pub mjpeg_url: Option<String>,
}

/// Build a figment that layers: defaults → config file → WDA_RELAY_* env vars → CLI.
///
/// Env vars use double-underscore for nesting into sections:
///   `WDA_RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
///   `WDA_RELAY_UPSTREAM__RETRY_DELAY_MS=500`  →  `upstream.retry_delay_ms = 500`
pub fn load_config(config_file: Option<&Path>, cli: &CliOverrides) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("WDA_RELAY_").split("__"));

    if let Some(host) = &cli.host {
        figment = figment.merge(Serialized::default("server.host", host));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(url) = &cli.wda_url {
        figment = figment.merge(Serialized::default("backend.wda_url", url));
    }
    if let Some(url) = &cli.mjpeg_url {
        figment = figment.merge(Serialized::default("upstream.mjpeg_url", url));
    }
    figment
}

// =============================================================================
// Runtime config (validated view of FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub backend: BackendConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Base URL without a trailing slash
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub mjpeg_url: String,
    pub connect_timeout: Duration,
    /// None = leave the hub disconnected until the next first subscriber
    pub retry_delay: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub buffer_chunks: usize,
    pub write_timeout: Duration,
}

impl RelayConfig {
    /// Extract and validate. Any error here is fatal at startup.
    pub fn load(config_file: Option<&Path>, cli: &CliOverrides) -> Result<Self, ConfigError> {
        // An explicitly named file must exist; figment would skip it silently
        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
        }
        let fc: FileConfig = load_config(config_file, cli)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        Self::from_file(&fc)
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self, ConfigError> {
        let host = fc.server.host.trim();
        if host.is_empty() {
            return Err(ConfigError::Empty {
                field: "server.host",
            });
        }
        if fc.server.port == 0 {
            return Err(ConfigError::InvalidPort {
                field: "server.port",
            });
        }
        let listen_addr = format!("{}:{}", host, fc.server.port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidUrl {
                field: "server.host",
                value: host.to_string(),
                reason: e.to_string(),
            })?;

        let wda_url = validate_url("backend.wda_url", &fc.backend.wda_url)?;
        let mjpeg_url = validate_url("upstream.mjpeg_url", &fc.upstream.mjpeg_url)?;

        non_zero("backend.request_timeout_secs", fc.backend.request_timeout_secs)?;
        non_zero("backend.max_body_mb", fc.backend.max_body_mb as u64)?;
        non_zero("upstream.connect_timeout_secs", fc.upstream.connect_timeout_secs)?;
        non_zero("session.buffer_chunks", fc.session.buffer_chunks as u64)?;
        non_zero("session.write_timeout_ms", fc.session.write_timeout_ms)?;

        let max_body_bytes = fc
            .backend
            .max_body_mb
            .checked_mul(1024 * 1024)
            .ok_or(ConfigError::TooLarge {
                field: "backend.max_body_mb",
            })?;

        Ok(Self {
            listen_addr,
            backend: BackendConfig {
                base_url: wda_url.trim_end_matches('/').to_string(),
                request_timeout: Duration::from_secs(fc.backend.request_timeout_secs),
                max_body_bytes,
            },
            upstream: UpstreamConfig {
                mjpeg_url,
                connect_timeout: Duration::from_secs(fc.upstream.connect_timeout_secs),
                retry_delay: if fc.upstream.retry_delay_ms == 0 {
                    None
                } else {
                    Some(Duration::from_millis(fc.upstream.retry_delay_ms))
                },
            },
            session: SessionConfig {
                buffer_chunks: fc.session.buffer_chunks,
                write_timeout: Duration::from_millis(fc.session.write_timeout_ms),
            },
        })
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    let parsed = reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: "expected an http:// or https:// url with a host".to_string(),
        });
    }
    Ok(value.to_string())
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}
