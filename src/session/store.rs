//! Session persistence.
//!
//! [`SessionStore`] abstracts where the session record lives so the client can
//! be exercised against an in-memory store in tests. [`FileSessionStore`] is
//! the production implementation: pretty-printed JSON at a fixed path, written
//! through a sibling temporary file and a rename so a save either lands whole
//! or not at all.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::Session;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No usable record at the path. A corrupt file is reported the same way
    /// because the caller recovers identically: start from a fresh session.
    #[error("no session found at {path:?}")]
    NotFound { path: PathBuf },
    #[error("I/O error on session file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("session serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SessionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound { .. })
    }
}

/// Storage backend for the session record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Session, SessionError>;

    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Human readable location, used in log lines.
    fn describe(&self) -> String;
}

/// JSON file backed store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Session, SessionError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(err) => return Err(self.io_error(err)),
        };

        serde_json::from_slice(&bytes).map_err(|err| {
            log::warn!("session file {:?} is unreadable: {}", self.path, err);
            SessionError::NotFound {
                path: self.path.clone(),
            }
        })
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let data = serde_json::to_vec_pretty(session)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.io_error(err))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &data)
            .await
            .map_err(|err| self.io_error(err))?;
        if let Err(err) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(err));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieRecord;
    use crate::session::{Credentials, SubmissionInfo};

    fn sample_session() -> Session {
        let mut session = Session::new();
        session.handle = "tourist".into();
        session.credentials = Credentials::new("tourist", "pa55word");
        session.cookies.push(CookieRecord {
            domain: "codeforces.com".into(),
            path: "/".into(),
            name: "JSESSIONID".into(),
            value: "0123ABCD".into(),
            expires: None,
            secure: true,
            http_only: true,
            host_only: true,
        });
        session.last_submission = Some(
            SubmissionInfo::new("1900", "C")
                .with_submission_id("241516000")
                .with_verdict("Accepted"),
        );
        session
    }

    #[tokio::test]
    async fn save_then_load_is_field_for_field_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session"));
        let session = sample_session();

        store.save(&session).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, session);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("absent"));
        let err = store.load().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn corrupt_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = FileSessionStore::new(&path).load().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn output_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session"));
        store.save(&sample_session()).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("{\n  \"cookies\""));
        assert!(text.contains("\"handle_or_email\": \"tourist\""));
    }
}
