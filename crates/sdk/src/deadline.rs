//! Deadline and cancellation propagation for blocking calls.
//!
//! Every blocking call in this crate (server selection, channel acquisition)
//! takes a [`Deadline`]. The effective bound is the earlier of the caller's
//! deadline and the configured timeout for that phase, so the layer never
//! waits longer than the caller is willing to.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{CancelledSnafu, Result, SelectionTimeoutSnafu};

/// Upper bound on a single blocking wait, so cancellation is observed promptly.
pub(crate) const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Point in time after which a blocking call gives up, plus an optional
/// cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
    budget: Option<Duration>,
    token: Option<CancellationToken>,
}

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A deadline `timeout` from now.
    ///
    /// A timeout too large to represent as an instant never expires.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self { expires_at: Instant::now().checked_add(timeout), budget: Some(timeout), token: None }
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the earlier of this deadline and `configured` from now,
    /// keeping the cancellation token.
    ///
    /// A configured timeout too large to represent leaves this deadline as is.
    #[must_use]
    pub fn effective(&self, configured: Duration) -> Self {
        let Some(configured_at) = Instant::now().checked_add(configured) else {
            return self.clone();
        };
        match self.expires_at {
            Some(at) if at <= configured_at => self.clone(),
            _ => Self {
                expires_at: Some(configured_at),
                budget: Some(configured),
                token: self.token.clone(),
            },
        }
    }

    /// Returns the time left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Returns whether the attached token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Returns how long the next blocking wait may last before the deadline
    /// and cancellation must be rechecked.
    #[must_use]
    pub fn next_wait(&self) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(CANCELLATION_POLL_INTERVAL),
            None => CANCELLATION_POLL_INTERVAL,
        }
    }

    /// Fails if the caller cancelled or the deadline passed.
    ///
    /// `waiting_for` names what the blocked call was waiting for and ends up
    /// in the error message.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token fired, `SelectionTimeout` when the
    /// deadline expired.
    pub fn check(&self, waiting_for: &str) -> Result<()> {
        if self.is_cancelled() {
            return CancelledSnafu { operation: format!("waiting for {waiting_for}") }.fail();
        }
        if self.is_expired() {
            let duration_ms =
                self.budget.map_or(0, |budget| u64::try_from(budget.as_millis()).unwrap_or(u64::MAX));
            return SelectionTimeoutSnafu { duration_ms, selector: waiting_for }.fail();
        }
        Ok(())
    }
}
