//! Task orchestration with error aggregation.
//!
//! - [`ExecutionContext`]: cancellation signal plus thread-safe collection of
//!   task errors, shared by every task of a unit of work.
//! - [`run`], [`run_parallel`], [`run_parallel_with_limit`]: run [`Task`]s
//!   serially, all at once, or through a counting admission gate.
//! - [`Pipeline`]: serial `then` steps followed by concurrent `parallel`
//!   steps over one shared request.
//!
//! Failures are never raised as panics by the orchestration layer. They are
//! recorded on the context and reported as [`TaskError`]s, joined when more
//! than one task failed.

pub mod context;
pub mod errors;
pub mod exec;
pub mod pipeline;
pub mod runtime;

pub use context::{CancelSignal, ExecutionContext};
pub use errors::{ErrorList, TaskError, TaskResult};
pub use exec::{
    ParallelResults, Task, run, run_parallel, run_parallel_bounded, run_parallel_with_limit,
};
pub use pipeline::{
    ExecutionMode, ParallelStep, Pipeline, PipelineMetrics, PipelineOutcome, SerialStep,
};
pub use runtime::{TaskweaveOptions, init_logging};

/// Re-exported so callers can build signals from their own tokens.
pub use tokio_util::sync::CancellationToken;
