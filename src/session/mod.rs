//! Persisted session record: cookies, credentials, anti-bot tokens and the
//! last observed submission.
//!
//! The JSON layout keeps the flat field names used by the `~/.cf/session`
//! file (`handle_or_email`, `ftaa`, ...) so existing files keep loading.

pub mod store;

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::cookies::CookieRecord;

pub use store::{FileSessionStore, SessionError, SessionStore};

const FTAA_LEN: usize = 18;
const BFAA_LEN: usize = 32;

/// Everything that survives a process restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub cookies: Vec<CookieRecord>,
    /// Canonical handle reported by the site; empty until the first login.
    pub handle: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(flatten)]
    pub tokens: AntiBotTokens,
    pub last_submission: Option<SubmissionInfo>,
}

impl Session {
    /// Fresh session with newly generated anti-bot tokens.
    pub fn new() -> Self {
        let mut session = Self::default();
        session.tokens.fill_missing();
        session
    }
}

/// Operator supplied login secrets.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub handle_or_email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(handle_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            handle_or_email: handle_or_email.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.handle_or_email.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("handle_or_email", &self.handle_or_email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Client generated fingerprint values the site expects on login and other
/// state-changing posts. Generated once and then reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiBotTokens {
    pub ftaa: String,
    pub bfaa: String,
}

impl AntiBotTokens {
    pub fn generate() -> Self {
        let mut tokens = Self::default();
        tokens.fill_missing();
        tokens
    }

    /// Generate whichever token is still empty. Returns true if anything
    /// changed.
    pub fn fill_missing(&mut self) -> bool {
        let mut changed = false;
        let mut rng = rand::thread_rng();
        if self.ftaa.is_empty() {
            self.ftaa = (0..FTAA_LEN)
                .map(|_| rng.sample(Alphanumeric) as char)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            changed = true;
        }
        if self.bfaa.is_empty() {
            self.bfaa = (0..BFAA_LEN)
                .map(|_| {
                    char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0')
                })
                .collect();
            changed = true;
        }
        changed
    }
}

/// Identity of the most recent submission seen by a watch/pull command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionInfo {
    pub contest_id: String,
    pub problem_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
}

impl SubmissionInfo {
    pub fn new(contest_id: impl Into<String>, problem_index: impl Into<String>) -> Self {
        Self {
            contest_id: contest_id.into(),
            problem_index: problem_index.into(),
            submission_id: None,
            verdict: None,
        }
    }

    pub fn with_submission_id(mut self, id: impl Into<String>) -> Self {
        self.submission_id = Some(id.into());
        self
    }

    pub fn with_verdict(mut self, verdict: impl Into<String>) -> Self {
        self.verdict = Some(verdict.into());
        self
    }
}
