//! Login state detection and the pieces of the login sequence that depend on
//! page markup.
//!
//! Login state is decided per response, never cached as process state: the
//! server's cookie state is the source of truth. The orchestration (fetch the
//! form, post credentials, verify) lives on [`crate::Client`]; this module
//! owns what a page *means*.

pub mod gate;
pub mod pages;

pub use gate::{LoginGate, LoginTicket};
pub use pages::{CodeforcesPages, PageInspector};

use thiserror::Error;

/// Verdict for one response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Authenticated(String),
    Unauthenticated,
    /// Neither the logged-in nor the anonymous marker is present. Callers
    /// treat this like `Unauthenticated`.
    Ambiguous,
}

impl LoginState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginState::Authenticated(_))
    }

    pub fn handle(&self) -> Option<&str> {
        match self {
            LoginState::Authenticated(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Classify a page body with the given inspector.
pub fn classify(inspector: &dyn PageInspector, body: &str) -> LoginState {
    if let Some(handle) = inspector.logged_in_handle(body) {
        return LoginState::Authenticated(handle);
    }
    if inspector.is_anonymous(body) {
        LoginState::Unauthenticated
    } else {
        LoginState::Ambiguous
    }
}

/// Clonable summary of a failed login, handed to every caller that waited on
/// the same single-flight attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
    #[error("no handle/email and password configured")]
    MissingCredentials,
    #[error("login rejected: {0}")]
    InvalidCredentials(String),
    #[error("login page is behind a challenge ({0})")]
    ChallengeBlocked(String),
    #[error("login page has no anti-forgery token")]
    MalformedLoginPage,
    #[error("login request timed out: {0}")]
    Timeout(String),
    #[error("login request failed: {0}")]
    Transport(String),
}

impl LoginFailure {
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            LoginFailure::MissingCredentials | LoginFailure::InvalidCredentials(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LoginFailure::Timeout(_))
    }
}
