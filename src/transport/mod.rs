//! Browser-shaped transport.
//!
//! Builds the single `reqwest::Client` every request goes through: a fixed
//! desktop Chrome header set, proxy routing, and the shared [`CookieJar`] as
//! the cookie provider. No retries happen here; transport failures reach the
//! caller unchanged.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::cookies::CookieJar;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

const NAVIGATION_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("accept-encoding", "gzip, deflate, br"),
    ("connection", "keep-alive"),
    ("upgrade-insecure-requests", "1"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("header conversion failed: {0}")]
    InvalidHeader(String),
    #[error("http client construction failed: {0}")]
    Build(#[from] reqwest::Error),
}

/// Header set presented to the server.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    user_agent: String,
}

impl Default for BrowserProfile {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl BrowserProfile {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| TransportError::InvalidHeader("user-agent".into()))?,
        );
        for &(name, value) in NAVIGATION_HEADERS {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        Ok(headers)
    }
}

/// Where outbound traffic is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySetting {
    /// Whatever `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` say.
    Environment,
    Explicit(Url),
}

/// Interpret the configured proxy string. Empty means environment defaults;
/// an unparsable value is reported and also falls back to the environment.
pub fn resolve_proxy(raw: Option<&str>) -> ProxySetting {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return ProxySetting::Environment;
    };
    match Url::parse(raw) {
        Ok(url) => ProxySetting::Explicit(url),
        Err(err) => {
            log::warn!("invalid proxy url {raw:?}: {err}; using proxy settings from environment");
            ProxySetting::Environment
        }
    }
}

/// Build the shared HTTP client.
pub fn build_http_client(
    profile: &BrowserProfile,
    proxy: &ProxySetting,
    jar: Arc<CookieJar>,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .default_headers(profile.headers()?)
        .cookie_provider(jar);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let ProxySetting::Explicit(url) = proxy {
        match reqwest::Proxy::all(url.as_str()) {
            Ok(proxy) => {
                log::debug!("routing requests through proxy {}", url);
                builder = builder.proxy(proxy);
            }
            Err(err) => {
                log::warn!("unusable proxy {url}: {err}; using proxy settings from environment");
            }
        }
    }

    Ok(builder.build()?)
}
