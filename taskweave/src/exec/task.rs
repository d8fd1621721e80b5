//! Zero-argument unit of work.

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::errors::{TaskError, TaskResult};

type RunFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, TaskResult<T>> + Send>;

/// A task producing a `T` or a [`TaskError`].
///
/// Tasks carry no identity; runners only know them by position.
pub struct Task<T> {
    run: RunFn<T>,
}

impl<T> Task<T>
where
    T: Send + 'static,
{
    /// Task from an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self {
            run: Box::new(move || f().boxed()),
        }
    }

    /// Task from a blocking closure, run on tokio's blocking thread pool.
    ///
    /// A panic in `f` is reported as [`TaskError::Panicked`].
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self::new(move || async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(&*e.into_panic()))),
                Err(e) => Err(TaskError::failed(format!("blocking task aborted: {}", e))),
            }
        })
    }

    /// Task that succeeds with `value`.
    pub fn ok(value: T) -> Self {
        Self::new(move || async move { Ok(value) })
    }

    /// Task that fails with `err`.
    pub fn fail(err: TaskError) -> Self {
        Self::new(move || async move { Err(err) })
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, TaskResult<T>> {
        (self.run)()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
