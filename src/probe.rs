//! Connectivity check against a known, always-public page.

use std::fmt;

use crate::client::{Client, ClientResult};

/// First problem of the first contest; it has existed for as long as the site.
pub const PROBE_PATH: &str = "/contest/1/problem/A";

/// Markers of a genuine problem page.
const PAGE_MARKERS: &[&str] = &["problemset", "problem-statement"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Healthy,
    /// An interactive verification page was served; a human has to solve it.
    ChallengeBlocked { pattern: String },
    /// The server answered, but not with the expected page.
    Unhealthy { reason: String },
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeStatus::Healthy)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Healthy => write!(f, "connected and logged in"),
            ProbeStatus::ChallengeBlocked { pattern } => {
                write!(f, "blocked by a {pattern} page")
            }
            ProbeStatus::Unhealthy { reason } => write!(f, "unexpected response: {reason}"),
        }
    }
}

impl Client {
    /// Fetch the probe page through the login wrapper and classify the result.
    ///
    /// Transport failures and rejected credentials are returned as errors; a
    /// challenge page and a page without the expected markers are statuses.
    pub async fn probe(&self) -> ClientResult<ProbeStatus> {
        let url = self.config().url_for(PROBE_PATH)?;

        let response = match self.get(url.clone()).await {
            Ok(response) => response,
            Err(err) => match err.challenge_pattern() {
                Some(pattern) => {
                    log::warn!("probe of {} hit a challenge page ({})", url, pattern);
                    return Ok(ProbeStatus::ChallengeBlocked {
                        pattern: pattern.to_string(),
                    });
                }
                None => return Err(err),
            },
        };

        let body = response.text();
        if PAGE_MARKERS.iter().any(|marker| body.contains(marker)) {
            log::info!("connected to {} as {}", self.config().host, self.current_handle());
            return Ok(ProbeStatus::Healthy);
        }

        let reason = format!(
            "{} answered HTTP {} without any of the markers {:?}",
            response.url(),
            response.status(),
            PAGE_MARKERS
        );
        log::warn!("probe failed: {}", reason);
        Ok(ProbeStatus::Unhealthy { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        assert_eq!(ProbeStatus::Healthy.to_string(), "connected and logged in");
        assert_eq!(
            ProbeStatus::ChallengeBlocked {
                pattern: "Cloudflare interstitial".into()
            }
            .to_string(),
            "blocked by a Cloudflare interstitial page"
        );
        assert!(ProbeStatus::Healthy.is_healthy());
    }
}
