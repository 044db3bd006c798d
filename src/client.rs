//! Authenticated session client.
//!
//! Wires together the cookie jar, the browser-shaped transport, session
//! persistence and login detection into one object that commands share. Every
//! page fetched through [`Client::send`] comes back from a logged-in session or
//! with an error explaining why that was impossible.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::challenges::ChallengeDetector;
use crate::config::{ClientConfig, ConfigError};
use crate::cookies::{CookieJar, CookieRecord};
use crate::login::{
	CodeforcesPages, LoginFailure, LoginGate, LoginState, LoginTicket, PageInspector, classify,
};
use crate::session::{
	AntiBotTokens, Credentials, FileSessionStore, Session, SessionError, SessionStore,
	SubmissionInfo,
};
use crate::transport::{BrowserProfile, TransportError, build_http_client, resolve_proxy};

const LOGIN_PATH: &str = "/enter";

/// Result alias used across the client layer.
pub type ClientResult<T> = Result<T, ClientError>;

/// High-level error surfaced to commands.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("transport setup failed: {0}")]
	Transport(#[from] TransportError),
	#[error("session persistence failed: {0}")]
	Session(#[from] SessionError),
	#[error("blocked by a {pattern} page; open the site in a browser, pass the check and retry")]
	ChallengeBlocked { pattern: String },
	#[error(transparent)]
	Login(#[from] LoginFailure),
}

impl ClientError {
	/// The operator has to re-enter handle/email or password.
	pub fn is_credential_error(&self) -> bool {
		matches!(self, ClientError::Login(failure) if failure.is_credential_error())
	}

	pub fn is_challenge(&self) -> bool {
		self.challenge_pattern().is_some()
	}

	/// Name of the challenge page that blocked the request, whether this
	/// caller hit it or a shared login did.
	pub fn challenge_pattern(&self) -> Option<&str> {
		match self {
			ClientError::ChallengeBlocked { pattern } => Some(pattern),
			ClientError::Login(LoginFailure::ChallengeBlocked(pattern)) => Some(pattern),
			_ => None,
		}
	}

	pub fn is_timeout(&self) -> bool {
		match self {
			ClientError::Http(err) => err.is_timeout(),
			ClientError::Login(failure) => failure.is_timeout(),
			_ => false,
		}
	}
}

impl From<&ClientError> for LoginFailure {
	fn from(err: &ClientError) -> Self {
		match err {
			ClientError::Login(failure) => failure.clone(),
			ClientError::ChallengeBlocked { pattern } => LoginFailure::ChallengeBlocked(pattern.clone()),
			ClientError::Http(source) if source.is_timeout() => LoginFailure::Timeout(source.to_string()),
			other => LoginFailure::Transport(other.to_string()),
		}
	}
}

/// Read-only HTTP response returned by the client.
#[derive(Debug, Clone)]
pub struct SessionResponse {
	status: u16,
	headers: HeaderMap,
	body: Bytes,
	url: Url,
}

impl SessionResponse {
	pub fn new(status: u16, headers: HeaderMap, body: Bytes, url: Url) -> Self {
		Self {
			status,
			headers,
			body,
			url,
		}
	}

	pub fn status(&self) -> u16 {
		self.status
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Final URL after redirects.
	pub fn url(&self) -> &Url {
		&self.url
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	pub fn bytes(&self) -> Bytes {
		self.body.clone()
	}
}

/// A request that can be replayed after a re-login.
#[derive(Debug, Clone)]
pub struct SessionRequest {
	pub method: Method,
	pub url: Url,
	pub form: Option<Vec<(String, String)>>,
	pub timeout: Option<Duration>,
}

impl SessionRequest {
	pub fn get(url: Url) -> Self {
		Self {
			method: Method::GET,
			url,
			form: None,
			timeout: None,
		}
	}

	pub fn post_form<I, K, V>(url: Url, fields: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			method: Method::POST,
			url,
			form: Some(
				fields
					.into_iter()
					.map(|(key, value)| (key.into(), value.into()))
					.collect(),
			),
			timeout: None,
		}
	}

	/// Overrides the client-wide timeout for this request only.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}
}

/// Fluent builder for [`Client`].
pub struct ClientBuilder {
	config: ClientConfig,
	store: Option<Arc<dyn SessionStore>>,
	inspector: Option<Arc<dyn PageInspector>>,
}

impl ClientBuilder {
	pub fn new(config: ClientConfig) -> Self {
		Self {
			config,
			store: None,
			inspector: None,
		}
	}

	/// Persist somewhere other than `config.session_path`.
	pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn with_inspector(mut self, inspector: Arc<dyn PageInspector>) -> Self {
		self.inspector = Some(inspector);
		self
	}

	/// Load (or create) the session, build the transport and write the
	/// session back so the file exists from the first run on.
	pub async fn build(self) -> ClientResult<Client> {
		let config = self.config;
		let store = self
			.store
			.unwrap_or_else(|| {
				Arc::new(FileSessionStore::new(&config.session_path)) as Arc<dyn SessionStore>
			});
		let inspector = self
			.inspector
			.unwrap_or_else(|| Arc::new(CodeforcesPages::new()) as Arc<dyn PageInspector>);

		let mut session = match store.load().await {
			Ok(session) => {
				log::info!("loaded session from {}", store.describe());
				session
			}
			Err(err) if err.is_not_found() => {
				log::info!("creating a new session in {}", store.describe());
				Session::new()
			}
			Err(err) => {
				log::warn!("failed to load session: {err}; starting a new one");
				Session::new()
			}
		};
		session.tokens.fill_missing();

		let jar = Arc::new(CookieJar::from_records(std::mem::take(&mut session.cookies)));
		let proxy = resolve_proxy(config.proxy.as_deref());
		let http = build_http_client(
			&BrowserProfile::new(config.user_agent.clone()),
			&proxy,
			jar.clone(),
			config.request_timeout,
		)?;

		let client = Client {
			config,
			http,
			jar,
			store,
			inspector,
			detector: ChallengeDetector::new(),
			session: RwLock::new(session),
			login_gate: LoginGate::new(),
			save_lock: tokio::sync::Mutex::new(()),
			saved_cookies: Mutex::new(Vec::new()),
		};
		client.persist().await;
		Ok(client)
	}
}

/// Shared, logged-in view of the site. Construct once at the entry point and
/// pass it by reference (or `Arc`) to every command.
pub struct Client {
	config: ClientConfig,
	http: reqwest::Client,
	jar: Arc<CookieJar>,
	store: Arc<dyn SessionStore>,
	inspector: Arc<dyn PageInspector>,
	detector: ChallengeDetector,
	/// `cookies` in here is stale; the jar is authoritative until the next
	/// snapshot.
	session: RwLock<Session>,
	login_gate: LoginGate,
	save_lock: tokio::sync::Mutex<()>,
	/// Jar contents as of the last successful save.
	saved_cookies: Mutex<Vec<CookieRecord>>,
}

impl Client {
	/// Build a client with the default file store and page inspector.
	pub async fn new(config: ClientConfig) -> ClientResult<Self> {
		ClientBuilder::new(config).build().await
	}

	pub fn builder(config: ClientConfig) -> ClientBuilder {
		ClientBuilder::new(config)
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn cookie_jar(&self) -> &Arc<CookieJar> {
		&self.jar
	}

	/// Handle of the last successful login; empty before the first one.
	pub fn current_handle(&self) -> String {
		self.read_session().handle.clone()
	}

	pub fn has_credentials(&self) -> bool {
		self.read_session().credentials.is_complete()
	}

	pub fn handle_or_email(&self) -> String {
		self.read_session().credentials.handle_or_email.clone()
	}

	pub fn anti_bot_tokens(&self) -> AntiBotTokens {
		self.read_session().tokens.clone()
	}

	pub fn last_submission(&self) -> Option<SubmissionInfo> {
		self.read_session().last_submission.clone()
	}

	/// Current session with the jar folded back into `cookies`.
	pub fn session_snapshot(&self) -> Session {
		let mut snapshot = self.read_session().clone();
		snapshot.cookies = self.jar.records();
		snapshot
	}

	/// Replace the stored credentials and persist. The in-memory update stands
	/// even when the save fails.
	pub async fn set_credentials(&self, credentials: Credentials) -> ClientResult<()> {
		self.write_session().credentials = credentials;
		self.save().await
	}

	pub async fn set_last_submission(&self, submission: Option<SubmissionInfo>) -> ClientResult<()> {
		self.write_session().last_submission = submission;
		self.save().await
	}

	/// Write the reconciled session to the store.
	pub async fn save(&self) -> ClientResult<()> {
		let _guard = self.save_lock.lock().await;
		let snapshot = self.session_snapshot();
		self.store.save(&snapshot).await?;
		*self.saved_cookies.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.cookies;
		log::debug!("saved session to {}", self.store.describe());
		Ok(())
	}

	/// True when the server changed cookies since the last save.
	fn cookies_unsaved(&self) -> bool {
		let live = self.jar.records();
		*self.saved_cookies.lock().unwrap_or_else(PoisonError::into_inner) != live
	}

	/// Save, reporting but not propagating failures.
	async fn persist(&self) {
		if let Err(err) = self.save().await {
			log::warn!(
				"cannot save session to {}: {}; continuing with an unsaved session",
				self.store.describe(),
				err
			);
		}
	}

	/// Perform an HTTP GET through [`Client::ensure_logged_in`].
	pub async fn get(&self, url: Url) -> ClientResult<SessionResponse> {
		self.send(SessionRequest::get(url)).await
	}

	/// Perform a form POST through [`Client::ensure_logged_in`].
	pub async fn post_form<I, K, V>(&self, url: Url, fields: I) -> ClientResult<SessionResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.send(SessionRequest::post_form(url, fields)).await
	}

	/// Send `request`, logging in and replaying it once if the session turned
	/// out to be gone. Cookies the server set or rotated along the way are
	/// persisted before returning; a login already saved its own.
	pub async fn send(&self, request: SessionRequest) -> ClientResult<SessionResponse> {
		let result = self.ensure_logged_in(|| self.execute(&request)).await;
		if self.cookies_unsaved() {
			log::debug!("{} {} changed cookies", request.method, request.url);
			self.persist().await;
		}
		result
	}

	/// Send `request` exactly as given: browser headers and cookies, no login
	/// handling.
	pub async fn execute(&self, request: &SessionRequest) -> ClientResult<SessionResponse> {
		let mut builder = self
			.http
			.request(request.method.clone(), request.url.clone());
		if let Some(ref form) = request.form {
			builder = builder.form(form);
		}
		if let Some(timeout) = request.timeout {
			builder = builder.timeout(timeout);
		}

		log::debug!("-> {} {}", request.method, request.url);
		let started = Instant::now();
		let resp = builder.send().await?;

		let final_url = resp.url().clone();
		let status = resp.status().as_u16();
		let headers = resp.headers().clone();
		let body = resp.bytes().await?;
		log::debug!(
			"<- {} {} -> {} ({:.2}s)",
			request.method,
			final_url,
			status,
			started.elapsed().as_secs_f64()
		);

		Ok(SessionResponse::new(status, headers, body, final_url))
	}

	/// Run `operation`; if its page is not logged in, log in (sharing the
	/// attempt with any concurrent caller) and run it exactly once more.
	///
	/// The replayed response is returned whatever it shows, so a site that keeps
	/// forgetting the session cannot cause a retry loop. Challenge pages are
	/// returned as [`ClientError::ChallengeBlocked`] without a login attempt.
	pub async fn ensure_logged_in<F, Fut>(&self, mut operation: F) -> ClientResult<SessionResponse>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = ClientResult<SessionResponse>>,
	{
		let ticket = self.login_gate.ticket();
		let response = operation().await?;
		let body = response.text();
		self.reject_challenge(&body)?;

		match classify(self.inspector.as_ref(), &body) {
			LoginState::Authenticated(handle) => {
				self.observe_handle(&handle).await;
				return Ok(response);
			}
			state => log::info!("{} came back {:?}; logging in", response.url(), state),
		}

		self.relogin(ticket).await?;

		let retried = operation().await?;
		self.reject_challenge(&retried.text())?;
		Ok(retried)
	}

	/// Log in now, serialized with any other login in flight.
	pub async fn login(&self) -> ClientResult<String> {
		self.login_gate.run(None, || self.perform_login()).await
	}

	async fn relogin(&self, ticket: LoginTicket) -> ClientResult<String> {
		self.login_gate
			.run(Some(ticket), || self.perform_login())
			.await
	}

	async fn perform_login(&self) -> ClientResult<String> {
		let credentials = self.read_session().credentials.clone();
		if !credentials.is_complete() {
			return Err(LoginFailure::MissingCredentials.into());
		}
		let tokens = self.anti_bot_tokens();
		let enter = self.config.url_for(LOGIN_PATH)?;

		log::info!("logging in as {}", credentials.handle_or_email);
		let form_page = self.execute(&SessionRequest::get(enter.clone())).await?;
		let body = form_page.text();
		self.reject_challenge(&body)?;
		let csrf = self
			.inspector
			.csrf_token(&body)
			.ok_or(LoginFailure::MalformedLoginPage)?;

		let Credentials {
			handle_or_email,
			password,
		} = credentials;
		let submit = SessionRequest::post_form(
			enter,
			[
				("csrf_token", csrf),
				("action", "enter".to_string()),
				("ftaa", tokens.ftaa),
				("bfaa", tokens.bfaa),
				("handleOrEmail", handle_or_email),
				("password", password),
				("remember", "on".to_string()),
			],
		);
		let result = self.execute(&submit).await?;
		let body = result.text();
		self.reject_challenge(&body)?;

		match classify(self.inspector.as_ref(), &body) {
			LoginState::Authenticated(handle) => {
				self.write_session().handle = handle.clone();
				log::info!("logged in as {}", handle);
				self.persist().await;
				Ok(handle)
			}
			_ => {
				let reason = self
					.inspector
					.login_error(&body)
					.unwrap_or_else(|| "the site did not accept the credentials".to_string());
				log::warn!("login failed: {}", reason);
				Err(LoginFailure::InvalidCredentials(reason).into())
			}
		}
	}

	/// Keep the cached handle in line with what the site shows.
	async fn observe_handle(&self, handle: &str) {
		let changed = {
			let mut session = self.write_session();
			if session.handle != handle {
				session.handle = handle.to_string();
				true
			} else {
				false
			}
		};
		if changed {
			self.persist().await;
		}
	}

	fn reject_challenge(&self, body: &str) -> ClientResult<()> {
		match self.detector.detect(body) {
			Some(detection) => {
				log::warn!("got a {} page instead of content", detection.pattern_name);
				Err(ClientError::ChallengeBlocked {
					pattern: detection.pattern_name.to_string(),
				})
			}
			None => Ok(()),
		}
	}

	fn read_session(&self) -> RwLockReadGuard<'_, Session> {
		self.session.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write_session(&self) -> RwLockWriteGuard<'_, Session> {
		self.session.write().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn follower_of_challenged_login_sees_challenge() {
		let gate = LoginGate::new();
		let leader_ticket = gate.ticket();
		let follower_ticket = gate.ticket();

		let leader = gate
			.run(Some(leader_ticket), || async {
				Err::<String, _>(ClientError::ChallengeBlocked {
					pattern: "Cloudflare interstitial".into(),
				})
			})
			.await
			.unwrap_err();
		let follower = gate
			.run(Some(follower_ticket), || async {
				Ok::<_, ClientError>("unreachable".to_string())
			})
			.await
			.unwrap_err();

		assert!(matches!(leader, ClientError::ChallengeBlocked { .. }));
		assert!(matches!(
			follower,
			ClientError::Login(LoginFailure::ChallengeBlocked(_))
		));
		assert_eq!(leader.challenge_pattern(), follower.challenge_pattern());
	}

	#[tokio::test]
	async fn shared_timeout_keeps_its_kind() {
		// Accepts connections at the TCP level but never answers.
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("http://{}/enter", listener.local_addr().unwrap());

		let err = reqwest::Client::new()
			.get(url)
			.timeout(Duration::from_millis(100))
			.send()
			.await
			.unwrap_err();
		let leader = ClientError::Http(err);
		let follower = ClientError::Login(LoginFailure::from(&leader));

		assert!(leader.is_timeout());
		assert!(follower.is_timeout());
		assert!(!follower.is_credential_error());
	}
}
