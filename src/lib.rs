//! # cf-session
//!
//! Authenticated session client for Codeforces, a site with no submission
//! API. The client behaves like a logged-in browser, keeps that login across
//! runs, notices when the server has forgotten it and logs in again without
//! the caller having to care.
//!
//! ## Features
//!
//! - Cookie jar persisted with credentials and anti-bot tokens in one JSON file
//! - Browser-identical request headers and optional proxy routing
//! - Login detection on every page and a single, shared re-login per expiry
//! - Challenge page detection (reported, never solved)
//! - Connectivity probe
//!
//! ## Example
//!
//! ```no_run
//! use cf_session::{Client, ClientConfig, ProbeStatus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::from_home()?).await?;
//!     match client.probe().await? {
//!         ProbeStatus::Healthy => println!("logged in as {}", client.current_handle()),
//!         other => println!("{other}"),
//!     }
//!     Ok(())
//! }
//! ```

mod client;

pub mod challenges;
pub mod config;
pub mod cookies;
pub mod login;
pub mod probe;
pub mod session;
pub mod transport;

pub use crate::client::{
    Client,
    ClientBuilder,
    ClientError,
    ClientResult,
    SessionRequest,
    SessionResponse,
};

pub use crate::challenges::{ChallengeDetection, ChallengeDetector, ChallengeType};

pub use crate::config::{ClientConfig, ClientConfigBuilder, ConfigError};

pub use crate::cookies::{CookieJar, CookieRecord};

pub use crate::login::{
    CodeforcesPages,
    LoginFailure,
    LoginGate,
    LoginState,
    PageInspector,
    classify,
};

pub use crate::probe::{PROBE_PATH, ProbeStatus};

pub use crate::session::{
    AntiBotTokens,
    Credentials,
    FileSessionStore,
    Session,
    SessionError,
    SessionStore,
    SubmissionInfo,
};

pub use crate::transport::{BrowserProfile, ProxySetting, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
