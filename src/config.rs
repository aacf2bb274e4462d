use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::GreinError;

pub const DEFAULT_BASE_URL: &str = "http://www.ilincs.org/apps/grein/";
pub const CONFIG_FILE_NAME: &str = "grein.json";
pub const BASE_URL_ENV: &str = "GREIN_BASE_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stream_timeout_secs: Option<u64>,
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Bound on every direct request and command post.
    pub request_timeout: Duration,
    /// Longest wait for the next line on the streaming channel.
    pub read_timeout: Duration,
    /// Lifetime of one streaming response.
    pub stream_timeout: Duration,
    /// Deadline for a whole fetch, handshake included.
    pub operation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("grein-loader/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(600),
            operation_timeout: Duration::from_secs(900),
        }
    }
}

/// Absolute locations derived from the configured application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: String,
    origin: String,
}

impl Endpoints {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.root, path.trim_start_matches('/'))
    }

    pub fn stream_url(&self, token: &str) -> String {
        self.join(&format!("__sockjs__/n={token}/xhr_streaming"))
    }

    pub fn send_url(&self, token: &str) -> String {
        self.join(&format!("__sockjs__/n={token}/xhr_send"))
    }

    pub fn referer(&self, dataset: Option<&str>) -> String {
        match dataset {
            Some(id) => format!("{}?gse={id}", self.root),
            None => self.root.clone(),
        }
    }
}

impl ClientConfig {
    pub fn endpoints(&self) -> Result<Endpoints, GreinError> {
        let mut root = self.base_url.trim().to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let url = Url::parse(&root)
            .map_err(|err| GreinError::InvalidConfig(format!("base_url {root}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(GreinError::InvalidConfig(format!(
                "base_url must be an http(s) URL: {root}"
            )));
        }
        Ok(Endpoints {
            origin: url.origin().ascii_serialization(),
            root,
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, GreinError> {
        let config = match path {
            Some(path) => Some(Self::read(PathBuf::from(path))?),
            None => match Self::discover() {
                Some(found) => Some(Self::read(found.into_std_path_buf())?),
                None => None,
            },
        };
        let mut resolved = Self::resolve_config(config.unwrap_or_default())?;
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                resolved.base_url = base_url.trim().to_string();
                resolved.endpoints()?;
            }
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ClientConfig, GreinError> {
        let defaults = ClientConfig::default();
        let secs = |value: Option<u64>, fallback: Duration, name: &str| match value {
            Some(0) => Err(GreinError::InvalidConfig(format!("{name} must be positive"))),
            Some(value) => Ok(Duration::from_secs(value)),
            None => Ok(fallback),
        };
        let resolved = ClientConfig {
            base_url: config.base_url.unwrap_or(defaults.base_url),
            user_agent: config.user_agent.unwrap_or(defaults.user_agent),
            request_timeout: secs(
                config.request_timeout_secs,
                defaults.request_timeout,
                "request_timeout_secs",
            )?,
            read_timeout: secs(
                config.read_timeout_secs,
                defaults.read_timeout,
                "read_timeout_secs",
            )?,
            stream_timeout: secs(
                config.stream_timeout_secs,
                defaults.stream_timeout,
                "stream_timeout_secs",
            )?,
            operation_timeout: secs(
                config.operation_timeout_secs,
                defaults.operation_timeout,
                "operation_timeout_secs",
            )?,
        };
        resolved.endpoints()?;
        Ok(resolved)
    }

    fn read(path: PathBuf) -> Result<Config, GreinError> {
        let content = fs::read_to_string(&path).map_err(|_| GreinError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| GreinError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE_NAME);
        if local.as_std_path().exists() {
            return Some(local);
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.config_dir().join("grein-loader").join(CONFIG_FILE_NAME),
                )
                .ok()
            })
            .filter(|path| path.as_std_path().exists())
    }
}
