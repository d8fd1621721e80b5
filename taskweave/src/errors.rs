//! Error types shared by contexts, runners and pipelines.
//!
//! Every failure surfaces as a [`TaskError`]. Failures from several tasks are
//! combined with [`TaskError::join`] / [`TaskError::join_all`] into a single
//! [`TaskError::Joined`] value; joins flatten, so joining is associative and
//! keeps insertion order.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout taskweave.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors produced while running tasks.
///
/// `TaskError` is `Clone` so a context can hand out its recorded error
/// while keeping its own copy. Foreign errors are held behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The cancellation token of the context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The deadline of the context has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A task body failed with a plain message.
    #[error("{0}")]
    Failed(String),

    /// Failure of the task at 1-based position `index` in a parallel batch.
    #[error("task {index}: {source}")]
    Task {
        index: usize,
        #[source]
        source: Box<TaskError>,
    },

    /// A task panicked instead of returning.
    #[error("panicked: {0}")]
    Panicked(String),

    /// Two or more failures reported together. Always holds at least two entries.
    #[error("{0}")]
    Joined(ErrorList),

    /// Rejected configuration or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other error raised by a task body.
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Wrap an arbitrary error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Other(Arc::new(err))
    }

    /// Tag `err` with the 1-based position of the task that produced it.
    pub fn tagged(index: usize, err: TaskError) -> Self {
        TaskError::Task {
            index,
            source: Box::new(err),
        }
    }

    /// Join two optional errors.
    ///
    /// `None` on either side is a no-op. Nested joins are flattened so the
    /// result is the same no matter how a sequence of joins is grouped.
    pub fn join(first: Option<TaskError>, second: Option<TaskError>) -> Option<TaskError> {
        match (first, second) {
            (None, err) | (err, None) => err,
            (Some(first), Some(second)) => {
                let mut list = first.into_vec();
                list.extend(second.into_vec());
                Some(TaskError::Joined(ErrorList(list)))
            }
        }
    }

    /// Join every error in `errors`, preserving order.
    ///
    /// Returns `None` for an empty input and the error itself for a single one.
    pub fn join_all<I>(errors: I) -> Option<TaskError>
    where
        I: IntoIterator<Item = TaskError>,
    {
        let mut list: Vec<TaskError> = errors.into_iter().flat_map(TaskError::into_vec).collect();
        match list.len() {
            0 => None,
            1 => list.pop(),
            _ => Some(TaskError::Joined(ErrorList(list))),
        }
    }

    /// The individual failures carried by this error.
    ///
    /// A joined error yields its entries, anything else yields itself.
    pub fn leaves(&self) -> std::slice::Iter<'_, TaskError> {
        match self {
            TaskError::Joined(list) => list.0.iter(),
            other => std::slice::from_ref(other).iter(),
        }
    }

    /// Whether `target` is one of the failures in this error, looking through
    /// joins and task tags.
    ///
    /// `Other` errors match by identity, everything else by value.
    pub fn contains(&self, target: &TaskError) -> bool {
        self.leaves().any(|leaf| {
            leaf.same_as(target)
                || matches!(leaf, TaskError::Task { source, .. } if source.contains(target))
        })
    }

    /// True for the two signal errors, cancellation and deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::DeadlineExceeded)
    }

    fn into_vec(self) -> Vec<TaskError> {
        match self {
            TaskError::Joined(list) => list.0,
            other => vec![other],
        }
    }

    fn same_as(&self, other: &TaskError) -> bool {
        match (self, other) {
            (TaskError::Cancelled, TaskError::Cancelled) => true,
            (TaskError::DeadlineExceeded, TaskError::DeadlineExceeded) => true,
            (TaskError::Failed(a), TaskError::Failed(b)) => a == b,
            (TaskError::Panicked(a), TaskError::Panicked(b)) => a == b,
            (TaskError::InvalidArgument(a), TaskError::InvalidArgument(b)) => a == b,
            (
                TaskError::Task { index, source },
                TaskError::Task {
                    index: other_index,
                    source: other_source,
                },
            ) => index == other_index && source.same_as(other_source),
            (TaskError::Joined(a), TaskError::Joined(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_as(y))
            }
            (TaskError::Other(a), TaskError::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
        TaskError::Other(Arc::from(boxed))
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::other(err)
    }
}

/// Ordered list of failures inside [`TaskError::Joined`].
///
/// Displays one failure per line.
#[derive(Debug, Clone)]
pub struct ErrorList(Vec<TaskError>);

impl ErrorList {
    pub fn iter(&self) -> std::slice::Iter<'_, TaskError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<TaskError> {
        self.0
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a TaskError;
    type IntoIter = std::slice::Iter<'a, TaskError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
