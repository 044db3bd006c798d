//! Challenge page detection.
//!
//! Provides pattern-based identification of interstitial verification pages
//! ("Just a moment...", browser checks, Turnstile widgets, edge error pages).
//! Nothing here tries to solve a challenge; a detection means the operator has
//! to step in.

use once_cell::sync::Lazy;
use regex::Regex;

/// High level challenge categories supported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Interstitial,
    BrowserVerification,
    Turnstile,
    RateLimit,
    AccessDenied,
}

/// Pattern definition used to match page bodies against known challenge
/// signatures.
#[derive(Debug, Clone)]
struct ChallengePattern {
    id: &'static str,
    name: &'static str,
    challenge_type: ChallengeType,
    patterns: Vec<Regex>,
}

impl ChallengePattern {
    fn new(
        id: &'static str,
        name: &'static str,
        challenge_type: ChallengeType,
        raw_patterns: &[&str],
    ) -> Self {
        let patterns = raw_patterns
            .iter()
            .map(|pattern| build_regex(pattern))
            .collect();

        Self {
            id,
            name,
            challenge_type,
            patterns,
        }
    }
}

/// Static list of known challenge signatures.
static KNOWN_PATTERNS: Lazy<Vec<ChallengePattern>> = Lazy::new(|| {
    vec![
        ChallengePattern::new(
            "cf_interstitial",
            "Cloudflare interstitial",
            ChallengeType::Interstitial,
            &[
                r"Just a moment\.\.\.",
                r"window\._cf_chl_opt\s*=",
                r#"<form[^>]*id="challenge-form""#,
            ],
        ),
        ChallengePattern::new(
            "cf_browser_verification",
            "Cloudflare browser verification",
            ChallengeType::BrowserVerification,
            &[
                r"cf-browser-verification",
                r#"/cdn-cgi/challenge-platform/\S*?orchestrate/"#,
                r"window\._cf_chl_ctx\s*=",
            ],
        ),
        ChallengePattern::new(
            "cf_turnstile",
            "Cloudflare Turnstile",
            ChallengeType::Turnstile,
            &[
                r#"class="cf-turnstile""#,
                r#"src="https://challenges\.cloudflare\.com/turnstile/v0/api\.js"#,
                r"cf-turnstile-response",
            ],
        ),
        ChallengePattern::new(
            "cf_rate_limit",
            "Cloudflare rate limit",
            ChallengeType::RateLimit,
            &[
                r#"<span[^>]*class="cf-error-code">1015<"#,
                r"You are being rate limited",
                r"<title>\s*Rate Limited\s*</title>",
            ],
        ),
        ChallengePattern::new(
            "cf_access_denied",
            "Cloudflare access denied",
            ChallengeType::AccessDenied,
            &[
                r#"<span[^>]*class="cf-error-code">10(?:10|20)<"#,
                r"The owner of this website has banned your access",
                r"has banned you temporarily",
            ],
        ),
    ]
});

/// Detection output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetection {
    pub pattern_id: &'static str,
    pub pattern_name: &'static str,
    pub challenge_type: ChallengeType,
    pub matched_indicators: Vec<String>,
}

/// Pattern-based challenge detector.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    known_patterns: &'static [ChallengePattern],
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            known_patterns: KNOWN_PATTERNS.as_slice(),
        }
    }

    /// Detect a challenge in a page body. Any single indicator is enough; the
    /// pattern with the most hits wins.
    pub fn detect(&self, body: &str) -> Option<ChallengeDetection> {
        let mut best: Option<ChallengeDetection> = None;

        for pattern in self.known_patterns {
            let matched: Vec<String> = pattern
                .patterns
                .iter()
                .filter(|regex| regex.is_match(body))
                .map(|regex| regex.as_str().to_string())
                .collect();

            if matched.is_empty() {
                continue;
            }

            if best
                .as_ref()
                .is_none_or(|current| matched.len() > current.matched_indicators.len())
            {
                best = Some(ChallengeDetection {
                    pattern_id: pattern.id,
                    pattern_name: pattern.name,
                    challenge_type: pattern.challenge_type,
                    matched_indicators: matched,
                });
            }
        }

        if let Some(ref detection) = best {
            log::debug!(
                "challenge page detected: {} ({} indicators)",
                detection.pattern_name,
                detection.matched_indicators.len()
            );
        }

        best
    }

    pub fn is_challenge(&self, body: &str) -> bool {
        self.detect(body).is_some()
    }
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid challenge detection regex `{}`: {}", pattern, err))
}
