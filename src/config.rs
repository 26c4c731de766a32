use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_REGISTRY_HOST: &str = "localhost:5000";
pub const DEFAULT_REGISTRY_PROTOCOL: &str = "http";
pub const DEFAULT_CONTENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATE_DIR: &str = ".regbrowse";

/// Everything the client core needs to know about its environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registry origin plus optional relay base path, without trailing slash.
    pub base_url: String,
    /// Host shown in `docker pull` commands.
    pub display_host: String,
    pub content_timeout: Duration,
    pub probe_timeout: Duration,
    pub state_dir: PathBuf,
}

impl ClientConfig {
    /// Build a config from either an explicit registry URL or protocol + host.
    pub fn new(
        registry: Option<&str>,
        protocol: &str,
        host: &str,
        base_path: Option<&str>,
    ) -> Result<Self, AppError> {
        let origin = match registry {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}://{}", protocol, host.trim_end_matches('/')),
        };
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(AppError::InvalidRegistryUrl(origin));
        }
        let display_host = origin
            .split_once("://")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_else(|| origin.clone());

        let base_url = match base_path.map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("{}/{}", origin, p),
            _ => origin,
        };

        Ok(Self {
            base_url,
            display_host,
            content_timeout: DEFAULT_CONTENT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        })
    }

    pub fn with_timeouts(mut self, content: Duration, probe: Duration) -> Self {
        self.content_timeout = content;
        self.probe_timeout = probe;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("{}://{}", DEFAULT_REGISTRY_PROTOCOL, DEFAULT_REGISTRY_HOST),
            display_host: DEFAULT_REGISTRY_HOST.to_string(),
            content_timeout: DEFAULT_CONTENT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}
