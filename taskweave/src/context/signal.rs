//! Cancellation signal observed by an execution context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskError;

/// Cancellation token plus an optional deadline.
///
/// This is the upstream signal a context chains to. It is read without any
/// lock; the token is internally synchronized and the deadline is immutable.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Observe an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Attach a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        });
        self
    }

    /// Attach a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derived signal: cancelled when this one is, cancellable on its own,
    /// and bound by the same deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this signal and every signal derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current state of the signal as an error, if it has fired.
    pub fn err(&self) -> Option<TaskError> {
        if self.token.is_cancelled() {
            return Some(TaskError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(TaskError::DeadlineExceeded),
            _ => None,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
