//! Ordered pipeline: serial steps, then concurrent steps.
//!
//! Threads a caller-owned request through every registered step and
//! collects the failures into one joined error.

use super::metrics::{PhaseMetrics, PipelineMetrics, StepMetrics};
use super::mode::ExecutionMode;
use super::step::{
    BoxedParallelStep, BoxedSerialStep, ParallelFn, ParallelStep, SerialFn, SerialStep,
};
use crate::context::ExecutionContext;
use crate::errors::{TaskError, TaskResult};
use crate::exec::panic_message;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

/// Pipeline builder.
///
/// The request must be `'static` because concurrent steps are spawned onto
/// the runtime; it is handed back by value once they have all finished.
///
/// Building consumes and returns the pipeline; [`result`](Self::result) and
/// [`run`](Self::run) consume it for good, so a pipeline executes at most once.
pub struct Pipeline<R> {
    ctx: ExecutionContext,
    request: R,
    serial: Vec<BoxedSerialStep<R>>,
    parallel: Vec<BoxedParallelStep<R>>,
}

/// Everything a pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutcome<R> {
    /// The request in whatever state the steps left it.
    pub request: R,
    /// Serial failure joined with the concurrent failures, if any.
    pub error: Option<TaskError>,
    pub metrics: PipelineMetrics,
}

impl<R> PipelineOutcome<R> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The request on success, the joined error otherwise.
    pub fn into_result(self) -> TaskResult<R> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.request),
        }
    }
}

impl<R> Pipeline<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(ctx: ExecutionContext, request: R) -> Self {
        Self {
            ctx,
            request,
            serial: Vec::new(),
            parallel: Vec::new(),
        }
    }

    /// Append a serial step. Serial steps run in append order.
    pub fn then<S>(mut self, step: S) -> Self
    where
        S: SerialStep<R> + 'static,
    {
        self.serial.push(Box::new(step));
        self
    }

    /// Append a serial step from a closure.
    ///
    /// ```ignore
    /// pipeline.then_fn(|_ctx, req| Box::pin(async move {
    ///     req.validated = true;
    ///     Ok(())
    /// }))
    /// ```
    pub fn then_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a ExecutionContext, &'a mut R) -> BoxFuture<'a, TaskResult<()>>
            + Send
            + Sync
            + 'static,
    {
        let name = format!("then#{}", self.serial.len() + 1);
        self.then(SerialFn::new(name, f))
    }

    /// Append a concurrent step. Concurrent steps start together once every
    /// serial step has finished.
    pub fn parallel<S>(mut self, step: S) -> Self
    where
        S: ParallelStep<R> + 'static,
    {
        self.parallel.push(Box::new(step));
        self
    }

    /// Append a concurrent step from a closure.
    pub fn parallel_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a ExecutionContext, &'a RwLock<R>) -> BoxFuture<'a, TaskResult<()>>
            + Send
            + Sync
            + 'static,
    {
        let name = format!("parallel#{}", self.parallel.len() + 1);
        self.parallel(ParallelFn::new(name, f))
    }

    /// Number of registered steps, serial and concurrent.
    pub fn len(&self) -> usize {
        self.serial.len() + self.parallel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute the pipeline and return the request with the joined error.
    pub async fn result(self) -> (R, Option<TaskError>) {
        let outcome = self.run().await;
        (outcome.request, outcome.error)
    }

    /// Execute the pipeline.
    ///
    /// 1. Serial steps run in order; the first failure stops the serial phase.
    /// 2. Concurrent steps all run, whether or not a serial step failed. Each
    ///    one is spawned as its own task, so a blocking step does not hold up
    ///    the others.
    /// 3. The serial error is joined with the concurrent errors in
    ///    registration order.
    ///
    /// A panicking step is reported as [`TaskError::Panicked`]. The request is
    /// returned in every case.
    pub async fn run(self) -> PipelineOutcome<R> {
        let total_start = Instant::now();
        let Pipeline {
            ctx,
            mut request,
            serial,
            parallel,
        } = self;

        let mut phases = Vec::new();

        // Serial phase
        let mut serial_error = None;
        if !serial.is_empty() {
            let phase_start = Instant::now();
            let mut steps = Vec::with_capacity(serial.len());

            for step in &serial {
                let name = step.name().to_string();
                let step_start = Instant::now();
                tracing::debug!(step = %name, "running serial step");

                let outcome = catch_step_panic(step.run(&ctx, &mut request)).await;
                steps.push(StepMetrics {
                    name,
                    duration_ms: step_start.elapsed().as_millis(),
                    failed: outcome.is_err(),
                });

                if let Err(e) = outcome {
                    tracing::warn!(
                        step = %step.name(),
                        error = %e,
                        "serial step failed, skipping remaining serial steps"
                    );
                    serial_error = Some(e);
                    break;
                }
            }

            phases.push(PhaseMetrics {
                execution: ExecutionMode::Sequential,
                duration_ms: phase_start.elapsed().as_millis(),
                steps,
            });
        }

        // Concurrent phase
        let shared = Arc::new(RwLock::new(request));
        let mut parallel_errors = Vec::new();
        if !parallel.is_empty() {
            let phase_start = Instant::now();
            let count = parallel.len();
            let mut slots: Vec<Option<(StepMetrics, Option<TaskError>)>> =
                std::iter::repeat_with(|| None).take(count).collect();
            let mut set = JoinSet::new();

            for (position, step) in parallel.into_iter().enumerate() {
                let ctx = ctx.clone();
                let shared = Arc::clone(&shared);
                set.spawn(async move {
                    let name = step.name().to_string();
                    let step_start = Instant::now();
                    tracing::debug!(step = %name, "running concurrent step");

                    let outcome = catch_step_panic(step.run(&ctx, &shared)).await;
                    if let Err(e) = &outcome {
                        tracing::warn!(step = %name, error = %e, "concurrent step failed");
                    }

                    let metrics = StepMetrics {
                        name,
                        duration_ms: step_start.elapsed().as_millis(),
                        failed: outcome.is_err(),
                    };
                    (position, metrics, outcome.err())
                });
            }

            let mut unjoined = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((position, metrics, err)) => slots[position] = Some((metrics, err)),
                    Err(e) => {
                        tracing::warn!(error = %e, "concurrent step could not be joined");
                        unjoined.push(TaskError::failed(format!("step join failed: {}", e)));
                    }
                }
            }

            let mut steps = Vec::with_capacity(count);
            for (metrics, err) in slots.into_iter().flatten() {
                steps.push(metrics);
                parallel_errors.extend(err);
            }
            parallel_errors.extend(unjoined);

            phases.push(PhaseMetrics {
                execution: ExecutionMode::Parallel,
                duration_ms: phase_start.elapsed().as_millis(),
                steps,
            });
        }

        let error = TaskError::join(serial_error, TaskError::join_all(parallel_errors));
        let metrics = PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            phases,
        };

        tracing::debug!(
            steps = metrics.steps_run(),
            failed = metrics.failed_steps().len(),
            duration_ms = u64::try_from(metrics.total_duration_ms).unwrap_or(u64::MAX),
            "pipeline finished"
        );

        PipelineOutcome {
            request: reclaim(shared).await,
            error,
            metrics,
        }
    }
}

/// Await a step, turning a panic into [`TaskError::Panicked`].
async fn catch_step_panic<F>(step: F) -> TaskResult<()>
where
    F: Future<Output = TaskResult<()>>,
{
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
    }
}

/// Take the request back once every concurrent step has let go of it.
///
/// All steps have been joined by now; a clone can only outlive the join
/// while its task is still being dropped on a worker.
async fn reclaim<R>(mut shared: Arc<RwLock<R>>) -> R {
    loop {
        match Arc::try_unwrap(shared) {
            Ok(lock) => return lock.into_inner(),
            Err(still_shared) => {
                shared = still_shared;
                tokio::task::yield_now().await;
            }
        }
    }
}
