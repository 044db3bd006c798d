//! Client configuration.
//!
//! Provides:
//! - Builder pattern over [`ClientConfig`]
//! - JSON loading of the operator config file (`~/.cf/config`)
//! - Defaults for host, session path, timeout and user agent

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::transport::DEFAULT_USER_AGENT;

pub const DEFAULT_HOST: &str = "https://codeforces.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONFIG_DIR: &str = ".cf";
const CONFIG_FILE: &str = "config";
const SESSION_FILE: &str = "session";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid host url {host:?}: {source}")]
    InvalidHost {
        host: String,
        source: url::ParseError,
    },
    #[error("I/O error reading {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("config JSON invalid at {path:?}: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot locate home directory")]
    NoHomeDir,
}

/// Immutable settings for one [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: Url,
    /// Explicit proxy URL; `None` uses the environment proxy settings.
    pub proxy: Option<String>,
    pub session_path: PathBuf,
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Defaults rooted in the user's home directory.
    pub fn from_home() -> Result<Self, ConfigError> {
        ClientConfigBuilder::new()
            .with_session_path(default_session_path()?)
            .build()
    }

    /// Load `{ "host": ..., "proxy": ... }` from `path`. A missing file yields
    /// the defaults; unknown keys are ignored.
    pub fn from_file(path: &Path) -> Result<ClientConfigBuilder, ConfigError> {
        let builder = ClientConfigBuilder::new();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("no config file at {:?}, using defaults", path);
                return Ok(builder);
            }
            Err(err) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let file: ConfigFile =
            serde_json::from_str(&contents).map_err(|err| ConfigError::InvalidJson {
                path: path.to_path_buf(),
                source: err,
            })?;

        let mut builder = builder;
        if let Some(host) = file.host.filter(|host| !host.trim().is_empty()) {
            builder = builder.with_host(host);
        }
        if let Some(proxy) = file.proxy {
            builder = builder.with_proxy(proxy);
        }
        Ok(builder)
    }

    /// Absolute URL for a site-relative path such as `/enter`.
    pub fn url_for(&self, path: &str) -> Result<Url, url::ParseError> {
        self.host.join(path)
    }
}

/// On-disk operator config. Field names follow the original file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(alias = "Host")]
    host: Option<String>,
    #[serde(alias = "Proxy")]
    proxy: Option<String>,
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    host: String,
    proxy: Option<String>,
    session_path: PathBuf,
    request_timeout: Option<Duration>,
    user_agent: String,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            proxy: None,
            session_path: PathBuf::from(CONFIG_DIR).join(SESSION_FILE),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        let proxy = proxy.into();
        self.proxy = (!proxy.trim().is_empty()).then_some(proxy);
        self
    }

    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let trimmed = self.host.trim().trim_end_matches('/');
        let host = Url::parse(trimmed).map_err(|source| ConfigError::InvalidHost {
            host: self.host.clone(),
            source,
        })?;

        Ok(ClientConfig {
            host,
            proxy: self.proxy,
            session_path: self.session_path,
            request_timeout: self.request_timeout,
            user_agent: self.user_agent,
        })
    }
}

/// `~/.cf/config`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(dirs::home_dir()
        .ok_or(ConfigError::NoHomeDir)?
        .join(CONFIG_DIR)
        .join(CONFIG_FILE))
}

/// `~/.cf/session`
pub fn default_session_path() -> Result<PathBuf, ConfigError> {
    Ok(dirs::home_dir()
        .ok_or(ConfigError::NoHomeDir)?
        .join(CONFIG_DIR)
        .join(SESSION_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(config.host.as_str(), "https://codeforces.com/");
        assert!(config.proxy.is_none());
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn url_for_joins_site_paths() {
        let config = ClientConfig::builder()
            .with_host("http://127.0.0.1:4000/")
            .build()
            .unwrap();
        assert_eq!(
            config.url_for("/contest/1/problem/A").unwrap().as_str(),
            "http://127.0.0.1:4000/contest/1/problem/A"
        );
    }

    #[test]
    fn blank_proxy_means_environment() {
        let config = ClientConfig::builder().with_proxy("  ").build().unwrap();
        assert!(config.proxy.is_none());
    }

    #[test]
    fn invalid_host_is_rejected() {
        let err = ClientConfig::builder().with_host("codeforces").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost { .. }));
    }

    #[test]
    fn loads_config_file_and_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"{"host": "https://mirror.codeforces.com", "proxy": "http://127.0.0.1:1080", "template": []}"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap().build().unwrap();
        assert_eq!(config.host.as_str(), "https://mirror.codeforces.com/");
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:1080"));
    }

    #[test]
    fn missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::from_file(&dir.path().join("nope"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.host.as_str(), "https://codeforces.com/");
    }
}
