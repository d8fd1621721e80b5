//! Cancellable, error-collecting execution context.
//!
//! An [`ExecutionContext`] is created once per logical unit of work and
//! handed to every task that participates in it. It answers two questions:
//!
//! - has the work been cancelled or run out of time? (its [`CancelSignal`])
//! - which tasks have failed so far? (its recorded errors)
//!
//! ## Error resolution
//!
//! ```text
//! err():
//!   1. signal cancelled / deadline passed  → Cancelled / DeadlineExceeded
//!   2. ancestor context has an error       → ancestor.err()
//!   3. own recorded errors                 → primary error (join of all)
//! ```
//!
//! Contexts derived with [`child`](ExecutionContext::child),
//! [`with_timeout`](ExecutionContext::with_timeout) or
//! [`with_deadline`](ExecutionContext::with_deadline) keep an explicit link to
//! the context they came from, which is consulted before their own state.

mod signal;

pub use signal::CancelSignal;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::errors::{TaskError, TaskResult};
use crate::runtime::options::{TaskweaveOptions, default_parallelism};

/// Shared cancellation and error-accumulation handle.
///
/// **Cloning**: cheap via `Arc`; all clones share the same error state.
///
/// **Locking**: the error state sits behind a `parking_lot::RwLock`. Readers
/// share it, writers are exclusive, and the lock is never held across an
/// `.await`. The signal is read without taking it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    signal: CancelSignal,
    ancestor: Option<ExecutionContext>,
    /// Admission limit used by `run_parallel_bounded`.
    max_parallel: usize,
    errors: RwLock<ErrorState>,
}

#[derive(Debug, Default)]
struct ErrorState {
    /// Join of every recorded error, first one in front.
    primary: Option<TaskError>,
    /// Every recorded error in insertion order.
    all: Vec<TaskError>,
}

impl ExecutionContext {
    /// Create a context chained to `signal`.
    ///
    /// A context always has a parent signal; there is no way to build one
    /// without it.
    pub fn new(signal: CancelSignal) -> Self {
        Self::build(signal, None, default_parallelism())
    }

    /// Context over a fresh signal that only fires when cancelled explicitly.
    pub fn background() -> Self {
        Self::new(CancelSignal::new())
    }

    /// Create a context from runtime options.
    ///
    /// Applies `timeout_ms` as a deadline and `max_parallel` as the default
    /// admission limit.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if the options fail validation.
    pub fn from_options(options: &TaskweaveOptions) -> TaskResult<Self> {
        options.sanitize()?;

        let mut signal = CancelSignal::new();
        if let Some(timeout) = options.timeout() {
            signal = signal.with_timeout(timeout);
        }

        Ok(Self::build(signal, None, options.max_parallel))
    }

    fn build(
        signal: CancelSignal,
        ancestor: Option<ExecutionContext>,
        max_parallel: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                signal,
                ancestor,
                max_parallel,
                errors: RwLock::new(ErrorState::default()),
            }),
        }
    }

    // ========================================================================
    // DERIVED CONTEXTS
    // ========================================================================

    /// Derive a context that shares this one's signal and reports this one's
    /// errors before its own.
    ///
    /// Errors recorded on the child stay on the child.
    pub fn child(&self) -> Self {
        self.derive(self.inner.signal.child())
    }

    /// Derive a child context that also expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.derive(self.inner.signal.child().with_timeout(timeout))
    }

    /// Derive a child context that also expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(self.inner.signal.child().with_deadline(deadline))
    }

    fn derive(&self, signal: CancelSignal) -> Self {
        Self::build(signal, Some(self.clone()), self.inner.max_parallel)
    }

    // ========================================================================
    // SIGNAL
    // ========================================================================

    /// Cancel this context and every context derived from it.
    ///
    /// Ancestors are not affected.
    pub fn cancel(&self) {
        tracing::debug!("execution context cancelled");
        self.inner.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.err().is_some()
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.inner.signal
    }

    pub fn ancestor(&self) -> Option<&ExecutionContext> {
        self.inner.ancestor.as_ref()
    }

    pub fn max_parallel(&self) -> usize {
        self.inner.max_parallel
    }

    // ========================================================================
    // ERROR STATE
    // ========================================================================

    /// Record a task failure.
    ///
    /// `None` is ignored. Otherwise the error is appended to the ordered list
    /// and joined onto the primary error, so [`err`](Self::err) reflects every
    /// failure so far.
    pub fn record_error(&self, err: impl Into<Option<TaskError>>) {
        let Some(err): Option<TaskError> = err.into() else {
            return;
        };

        tracing::trace!(error = %err, "recording task error");

        let mut state = self.inner.errors.write();
        state.all.push(err.clone());
        state.primary = TaskError::join(state.primary.take(), Some(err));
    }

    /// Chaining form of [`record_error`](Self::record_error).
    pub fn with_error(&self, err: impl Into<Option<TaskError>>) -> &Self {
        self.record_error(err);
        self
    }

    /// The error this context currently reports, if any.
    ///
    /// The signal wins over everything, then the ancestor's error, then the
    /// errors recorded here.
    pub fn err(&self) -> Option<TaskError> {
        if let Some(err) = self.inner.signal.err() {
            return Some(err);
        }

        if let Some(err) = self.inner.ancestor.as_ref().and_then(ExecutionContext::err) {
            return Some(err);
        }

        self.inner.errors.read().primary.clone()
    }

    /// Join of every error recorded on this context (ancestors excluded), in
    /// insertion order.
    pub fn all_errors(&self) -> Option<TaskError> {
        let state = self.inner.errors.read();
        TaskError::join_all(state.all.iter().cloned())
    }

    /// Number of errors recorded on this context.
    pub fn error_count(&self) -> usize {
        self.inner.errors.read().all.len()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}
