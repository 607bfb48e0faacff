//! Cancellation, deadlines and the transport hijack slot.
//!
//! A [`Context`] travels with every blocking call of the stack. Each suspension
//! point goes through [`Context::run`], which fails with `Cancelled` when the
//! token fires and with `Timeout` when the deadline passes.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::net::ConnIo;

#[derive(Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    hijacker: Option<TransportHijacker>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled by `token`.
    pub fn from_token(token: CancellationToken) -> Self {
        Context {
            cancel: token,
            deadline: None,
            hijacker: None,
        }
    }

    /// Child context that is cancelled with this one, plus the token that
    /// cancels only the child.
    pub fn with_cancel(&self) -> (Context, CancellationToken) {
        let token = self.cancel.child_token();
        let ctx = Context {
            cancel: token.clone(),
            deadline: self.deadline,
            hijacker: self.hijacker.clone(),
        };
        (ctx, token)
    }

    /// Context whose deadline is the earlier of the current one and `at`.
    pub fn with_deadline(&self, at: Instant) -> Context {
        let deadline = match self.deadline {
            Some(current) if current <= at => current,
            _ => at,
        };
        Context {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
            hijacker: self.hijacker.clone(),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Same context with `timeout` applied when one is configured.
    pub fn with_optional_timeout(&self, timeout: Option<Duration>) -> Context {
        match timeout {
            Some(t) => self.with_timeout(t),
            None => self.clone(),
        }
    }

    pub fn with_hijacker(&self, hijacker: TransportHijacker) -> Context {
        Context {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            hijacker: Some(hijacker),
        }
    }

    pub fn hijacker(&self) -> Option<&TransportHijacker> {
        self.hijacker.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Error::Timeout),
            _ => Ok(()),
        }
    }

    /// Drives `fut` unless the context fires first.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        self.check()?;
        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = sleep_until(self.deadline) => Err(Error::Timeout),
            res = fut => res.map_err(Into::into),
        };
        if res.is_ok() {
            self.check()?;
        }
        res
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep_until(self.deadline) => {}
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("hijacker", &self.hijacker.is_some())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Single-slot hand-off of a client connection.
///
/// When a context carrying a hijacker reaches the round tripper, the
/// connection is parked here instead of being closed when the exchange ends.
#[derive(Clone, Default)]
pub struct TransportHijacker {
    slot: Arc<Mutex<Option<ConnIo>>>,
}

impl TransportHijacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, conn: ConnIo) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(conn);
    }

    /// Takes the parked connection, if a transaction stored one.
    pub fn take(&self) -> Option<ConnIo> {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }
}
