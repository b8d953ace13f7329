use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::request::Method;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "HPPT_CONFIG";
/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: Limits,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory static files are served from.
    pub root_dir: PathBuf,
    /// One of `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Run files under `root_dir/cgi-bin` as CGI scripts.
    pub cgi: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            root_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            cgi: false,
        }
    }
}

/// Per-connection parsing limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Longest request line, CRLF excluded.
    pub max_request_line: usize,
    /// Largest header section: request line, fields and the blank line.
    /// Chunked trailers get a budget of the same size.
    pub max_header_size: usize,
    /// Most header fields in one request.
    pub max_headers: usize,
    /// Largest decoded request body.
    pub max_body_size: u64,
    /// Methods the parser accepts, anything else is rejected.
    pub methods: Vec<Method>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_request_line: 8 * 1024,
            max_header_size: 64 * 1024,
            max_headers: 100,
            max_body_size: 1024 * 1024,
            methods: Method::defaults(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Longest silence from the client, in milliseconds.
    pub idle_ms: u64,
    /// Longest time to receive one request, in milliseconds.
    pub request_ms: u64,
}

impl Timeouts {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// Reads the YAML file named by `HPPT_CONFIG` if it is set and falls back
    /// to the defaults otherwise. `LISTEN` overrides the listen address.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let yaml = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                Self::from_yaml(&yaml).with_context(|| format!("Invalid config file {}", path))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = addr;
        }

        Ok(cfg)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.limits.methods.is_empty() {
            anyhow::bail!("limits.methods must not be empty");
        }
        if self.limits.max_header_size <= self.limits.max_request_line {
            anyhow::bail!("limits.max_header_size must be larger than limits.max_request_line");
        }
        if self.timeouts.idle_ms == 0 || self.timeouts.request_ms == 0 {
            anyhow::bail!("timeouts must be non-zero");
        }
        Ok(())
    }
}
