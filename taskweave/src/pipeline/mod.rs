//! Ordered task pipeline.
//!
//! Threads one mutable request through a sequence of serial steps followed by
//! a set of concurrent steps:
//!
//! ```text
//! Pipeline → serial phase → concurrent phase
//!
//! - serial phase:     then(A) → then(B) → ...   (&mut R, stops at first failure)
//! - concurrent phase: parallel(C) ┬ parallel(D)  (&RwLock<R>, always runs)
//!                                 └ ...
//! ```
//!
//! Concurrent steps share a single `tokio::sync::RwLock` around the request.
//! The pipeline never takes that lock itself; each step locks it for as long
//! as its own read or mutation needs.
//!
//! ## Example
//!
//! ```ignore
//! use taskweave::{ExecutionContext, Pipeline};
//!
//! let (order, err) = Pipeline::new(ExecutionContext::background(), Order::default())
//!     .then(ValidateOrder)
//!     .then(PriceOrder)
//!     .parallel(ReserveStock)
//!     .parallel(NotifyWarehouse)
//!     .result()
//!     .await;
//! ```

mod metrics;
mod mode;
#[allow(clippy::module_inception)]
mod pipeline;
mod step;

pub use metrics::{PhaseMetrics, PipelineMetrics, StepMetrics};
pub use mode::ExecutionMode;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use step::{
    BoxedParallelStep, BoxedSerialStep, ParallelFn, ParallelStep, SerialFn, SerialStep,
};
