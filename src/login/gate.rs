//! Single-flight guard around the login sequence.
//!
//! Every caller that saw an unauthenticated page takes a [`LoginTicket`]
//! *before* sending its request. When it later asks for a login, the gate
//! compares the ticket with the number of logins completed since: if another
//! task already finished one in the meantime, the caller gets that outcome
//! instead of starting a second login.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use super::LoginFailure;

/// Snapshot of the login generation taken before a request was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTicket {
    generation: u64,
}

#[derive(Debug, Default)]
pub struct LoginGate {
    generation: AtomicU64,
    last_outcome: Mutex<Option<Result<String, LoginFailure>>>,
}

impl LoginGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> LoginTicket {
        LoginTicket {
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// Number of completed login attempts, successful or not.
    pub fn completed(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `login` unless a login finished after `ticket` was taken, in which
    /// case its outcome is returned. Without a ticket the login always runs
    /// (still serialized with any other attempt).
    ///
    /// If the future is dropped mid-login the generation is left untouched and
    /// the next waiter performs the login itself.
    pub async fn run<F, Fut, E>(&self, ticket: Option<LoginTicket>, login: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: From<LoginFailure>,
        for<'a> LoginFailure: From<&'a E>,
    {
        let mut last = self.last_outcome.lock().await;

        if let Some(ticket) = ticket
            && ticket.generation != self.generation.load(Ordering::Acquire)
            && let Some(outcome) = last.as_ref()
        {
            log::debug!("reusing login completed by a concurrent request");
            return outcome.clone().map_err(E::from);
        }

        let result = login().await;
        *last = Some(match &result {
            Ok(handle) => Ok(handle.clone()),
            Err(err) => Err(LoginFailure::from(err)),
        });
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }
}

impl From<&LoginFailure> for LoginFailure {
    fn from(failure: &LoginFailure) -> Self {
        failure.clone()
    }
}
