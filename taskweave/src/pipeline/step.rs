//! Step traits for the ordered pipeline.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::context::ExecutionContext;
use crate::errors::TaskResult;

/// A step run during the serial phase.
///
/// Serial steps run one at a time, so they get the request by `&mut`.
#[async_trait]
pub trait SerialStep<R: Send>: Send + Sync {
    /// Execute the step against the shared request.
    async fn run(&self, ctx: &ExecutionContext, request: &mut R) -> TaskResult<()>;

    /// Human-readable step name for logging and metrics.
    fn name(&self) -> &str;
}

/// A step run during the concurrent phase.
///
/// All concurrent steps share one lock around the request. Acquiring it is
/// the step's job: take the write lock only for the duration of a mutation,
/// so read-only steps can overlap.
#[async_trait]
pub trait ParallelStep<R: Send + Sync>: Send + Sync {
    /// Execute the step against the shared request.
    async fn run(&self, ctx: &ExecutionContext, request: &RwLock<R>) -> TaskResult<()>;

    /// Human-readable step name for logging and metrics.
    fn name(&self) -> &str;
}

pub type BoxedSerialStep<R> = Box<dyn SerialStep<R>>;
pub type BoxedParallelStep<R> = Box<dyn ParallelStep<R>>;

/// Serial step backed by a closure. Built by `Pipeline::then_fn`.
pub struct SerialFn<F> {
    name: String,
    f: F,
}

impl<F> SerialFn<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<R, F> SerialStep<R> for SerialFn<F>
where
    R: Send,
    F: for<'a> Fn(&'a ExecutionContext, &'a mut R) -> BoxFuture<'a, TaskResult<()>> + Send + Sync,
{
    async fn run(&self, ctx: &ExecutionContext, request: &mut R) -> TaskResult<()> {
        (self.f)(ctx, request).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Concurrent step backed by a closure. Built by `Pipeline::parallel_fn`.
pub struct ParallelFn<F> {
    name: String,
    f: F,
}

impl<F> ParallelFn<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<R, F> ParallelStep<R> for ParallelFn<F>
where
    R: Send + Sync,
    F: for<'a> Fn(&'a ExecutionContext, &'a RwLock<R>) -> BoxFuture<'a, TaskResult<()>>
        + Send
        + Sync,
{
    async fn run(&self, ctx: &ExecutionContext, request: &RwLock<R>) -> TaskResult<()> {
        (self.f)(ctx, request).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
