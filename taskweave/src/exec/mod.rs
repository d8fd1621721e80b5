//! Task execution strategies.
//!
//! Three ways to run [`Task`]s against an [`ExecutionContext`]:
//!
//! ```text
//! run                      one task, awaited inline
//! run_parallel             one tokio task per input, all started at once
//! run_parallel_with_limit  same, at most `limit` running at any instant
//! ```
//!
//! Every strategy checks `ctx.err()` first and runs nothing if the context
//! has already failed or been cancelled. Once started, tasks always run to
//! completion: a failing task never aborts its siblings, and cancellation is
//! not observed mid-flight.

mod task;

pub use task::Task;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::errors::{TaskError, TaskResult};
pub(crate) use task::panic_message;

/// Outcome of a parallel run.
///
/// `values` always has one slot per input task; slot `i` holds task `i`'s
/// value or `None` if it failed (or never ran because the context had
/// already failed).
#[derive(Debug)]
pub struct ParallelResults<T> {
    values: Vec<Option<T>>,
    error: Option<TaskError>,
}

impl<T> ParallelResults<T> {
    fn short_circuit(count: usize, error: TaskError) -> Self {
        Self {
            values: std::iter::repeat_with(|| None).take(count).collect(),
            error: Some(error),
        }
    }

    pub fn values(&self) -> &[Option<T>] {
        &self.values
    }

    /// Join of this run's failures in task order, or the context's existing
    /// error if the run was skipped.
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_parts(self) -> (Vec<Option<T>>, Option<TaskError>) {
        (self.values, self.error)
    }

    /// All values if every task succeeded, otherwise the joined error.
    pub fn into_result(self) -> TaskResult<Vec<T>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values.into_iter().flatten().collect()),
        }
    }
}

/// Run a single task.
///
/// A failure is recorded on `ctx` and `None` is returned; inspect
/// `ctx.err()` to find out why. If `ctx` has already failed the task is not
/// started.
pub async fn run<T>(ctx: &ExecutionContext, task: Task<T>) -> Option<T>
where
    T: Send + 'static,
{
    if let Some(err) = ctx.err() {
        tracing::debug!(error = %err, "context already failed, skipping task");
        return None;
    }

    match task.into_future().await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "task failed");
            ctx.record_error(e);
            None
        }
    }
}

/// Run every task concurrently and wait for all of them.
///
/// Each failure is tagged `task N: <cause>` (1-based) and recorded on `ctx`.
pub async fn run_parallel<T>(ctx: &ExecutionContext, tasks: Vec<Task<T>>) -> ParallelResults<T>
where
    T: Send + 'static,
{
    execute(ctx, None, tasks).await
}

/// Like [`run_parallel`], but at most `limit` tasks run at the same time.
///
/// Admission follows the order of `tasks`; completion order is unconstrained.
///
/// # Panics
///
/// Panics if `limit` is zero, since no task could ever be admitted.
pub async fn run_parallel_with_limit<T>(
    ctx: &ExecutionContext,
    limit: usize,
    tasks: Vec<Task<T>>,
) -> ParallelResults<T>
where
    T: Send + 'static,
{
    assert!(limit > 0, "run_parallel_with_limit requires a limit of at least 1");
    execute(ctx, Some(Arc::new(Semaphore::new(limit))), tasks).await
}

/// [`run_parallel_with_limit`] using the context's configured
/// `max_parallel` as the limit.
pub async fn run_parallel_bounded<T>(
    ctx: &ExecutionContext,
    tasks: Vec<Task<T>>,
) -> ParallelResults<T>
where
    T: Send + 'static,
{
    run_parallel_with_limit(ctx, ctx.max_parallel(), tasks).await
}

async fn execute<T>(
    ctx: &ExecutionContext,
    gate: Option<Arc<Semaphore>>,
    tasks: Vec<Task<T>>,
) -> ParallelResults<T>
where
    T: Send + 'static,
{
    let count = tasks.len();

    if let Some(err) = ctx.err() {
        tracing::debug!(
            tasks = count,
            error = %err,
            "context already failed, skipping parallel run"
        );
        return ParallelResults::short_circuit(count, err);
    }

    tracing::debug!(
        tasks = count,
        limit = ?gate.as_ref().map(|g| g.available_permits()),
        "starting parallel run"
    );

    let mut failures: Vec<Option<TaskError>> =
        std::iter::repeat_with(|| None).take(count).collect();
    let mut set = JoinSet::new();

    for (position, task) in tasks.into_iter().enumerate() {
        let index = position + 1;

        // Acquire before spawning so admission follows input order.
        let permit = match &gate {
            Some(gate) => match Arc::clone(gate).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    let err = TaskError::tagged(
                        index,
                        TaskError::failed(format!("admission gate closed: {}", e)),
                    );
                    ctx.record_error(err.clone());
                    failures[position] = Some(err);
                    continue;
                }
            },
            None => None,
        };

        let ctx = ctx.clone();
        set.spawn(async move {
            let _permit = permit;
            tracing::trace!(task = index, "task started");

            let result = match AssertUnwindSafe(task.into_future()).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
            };

            let result = result.map_err(|e| {
                let err = TaskError::tagged(index, e);
                tracing::warn!(task = index, error = %err, "parallel task failed");
                ctx.record_error(err.clone());
                err
            });

            tracing::trace!(task = index, ok = result.is_ok(), "task finished");
            (position, result)
        });
    }

    let mut values: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
    let mut unjoined = Vec::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((position, Ok(value))) => values[position] = Some(value),
            Ok((position, Err(err))) => failures[position] = Some(err),
            Err(e) => {
                tracing::warn!(error = %e, "parallel task could not be joined");
                let err = TaskError::failed(format!("task join failed: {}", e));
                ctx.record_error(err.clone());
                unjoined.push(err);
            }
        }
    }

    let error = TaskError::join_all(failures.into_iter().flatten().chain(unjoined));

    tracing::debug!(
        tasks = count,
        failed = error.as_ref().map_or(0, |e| e.leaves().count()),
        "parallel run finished"
    );

    ParallelResults { values, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_task(
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        value: usize,
    ) -> Task<usize> {
        Task::new(move || async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    async fn explode() -> TaskResult<i32> {
        panic!("task blew up")
    }

    #[tokio::test]
    async fn test_run_success() {
        let ctx = ExecutionContext::background();
        let result = run(&ctx, Task::new(|| async { Ok("success".to_string()) })).await;

        assert_eq!(result.as_deref(), Some("success"));
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_run_records_error_and_short_circuits() {
        let ctx = ExecutionContext::background();
        let expected = TaskError::failed("test error");

        let first = run(&ctx, Task::<String>::fail(expected.clone())).await;
        assert!(first.is_none());

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let second = run(
            &ctx,
            Task::new(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(20_i64)
            }),
        )
        .await;

        assert!(second.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.err().unwrap().to_string(), "test error");
    }

    #[tokio::test]
    async fn test_run_zero_value_is_not_failure() {
        let ctx = ExecutionContext::background();
        assert_eq!(run(&ctx, Task::ok(0_u32)).await, Some(0));
        assert!(ctx.err().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_success() {
        let ctx = ExecutionContext::background();
        let results = run_parallel(&ctx, vec![Task::ok(1), Task::ok(2), Task::ok(3)]).await;

        assert!(results.is_ok());
        assert_eq!(results.into_result().unwrap(), vec![1, 2, 3]);
        assert!(ctx.err().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_keeps_positions() {
        let ctx = ExecutionContext::background();
        let tasks = (0..8_u64)
            .map(|i| {
                Task::new(move || async move {
                    // Later tasks finish first.
                    tokio::time::sleep(Duration::from_millis(40 - i * 5)).await;
                    Ok(i)
                })
            })
            .collect();

        let (values, error) = run_parallel(&ctx, tasks).await.into_parts();
        assert!(error.is_none());
        assert_eq!(values, (0..8).map(Some).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_tags_failures() {
        let ctx = ExecutionContext::background();
        let results = run_parallel(
            &ctx,
            vec![
                Task::fail(TaskError::failed("error 1")),
                Task::ok(2),
                Task::fail(TaskError::failed("error 3")),
            ],
        )
        .await;

        let (values, error) = results.into_parts();
        let error = error.unwrap();
        let text = error.to_string();

        assert_eq!(values, vec![None, Some(2), None]);
        assert!(text.contains("task 1: error 1"));
        assert!(text.contains("task 3: error 3"));
        assert!(!text.contains("task 2"));
        assert_eq!(ctx.error_count(), 2);
        assert!(ctx.err().unwrap().contains(&TaskError::failed("error 3")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_skips_after_failure() {
        let ctx = ExecutionContext::background();

        let first = run_parallel(&ctx, vec![Task::<u8>::fail(TaskError::failed("a"))]).await;
        assert_eq!(first.error().unwrap().to_string(), "task 1: a");

        // The context has failed now, so the next run is skipped.
        let second = run_parallel(&ctx, vec![Task::ok(1_u8), Task::ok(2_u8)]).await;
        assert_eq!(second.values(), &[None, None]);
        assert_eq!(second.error().unwrap().to_string(), "task 1: a");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_error_covers_only_this_call() {
        let parent = ExecutionContext::background();
        let left = parent.child();
        let right = parent.child();

        right.record_error(TaskError::failed("unrelated"));
        let results = run_parallel(&left, vec![Task::<u8>::fail(TaskError::failed("mine"))]).await;

        assert_eq!(results.error().unwrap().to_string(), "task 1: mine");
        assert_eq!(left.error_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_does_not_abort_siblings() {
        let ctx = ExecutionContext::background();
        let finished = Arc::new(AtomicUsize::new(0));

        let mut tasks = vec![Task::<()>::fail(TaskError::failed("fast failure"))];
        for _ in 0..4 {
            let finished = Arc::clone(&finished);
            tasks.push(Task::new(move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let results = run_parallel(&ctx, tasks).await;
        assert!(!results.is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_reports_panics() {
        let ctx = ExecutionContext::background();
        let results = run_parallel(
            &ctx,
            vec![
                Task::ok(1),
                Task::new(explode),
            ],
        )
        .await;

        let error = results.error().unwrap();
        assert_eq!(error.to_string(), "task 2: panicked: task blew up");
        assert_eq!(results.values()[0], Some(1));
    }

    #[tokio::test]
    async fn test_run_parallel_skips_on_cancelled_context() {
        let ctx = ExecutionContext::background();
        ctx.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let results = run_parallel(
            &ctx,
            vec![Task::new(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })],
        )
        .await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(results.values().len(), 1);
        assert!(matches!(results.error(), Some(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_parallel_empty() {
        let ctx = ExecutionContext::background();
        let results = run_parallel::<u8>(&ctx, Vec::new()).await;
        assert!(results.is_ok());
        assert!(results.values().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_with_limit_respects_limit() {
        let ctx = ExecutionContext::background();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10)
            .map(|i| counting_task(Arc::clone(&running), Arc::clone(&peak), i))
            .collect();

        let results = run_parallel_with_limit(&ctx, 3, tasks).await;

        assert!(results.is_ok());
        assert_eq!(results.values().len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_with_limit_one_is_serial() {
        let ctx = ExecutionContext::background();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..5)
            .map(|i| counting_task(Arc::clone(&running), Arc::clone(&peak), i))
            .collect();

        let values = run_parallel_with_limit(&ctx, 1, tasks)
            .await
            .into_result()
            .unwrap();

        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_with_limit_admits_in_supplied_order() {
        let ctx = ExecutionContext::background();
        let started = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let tasks = (0..8_u64)
            .map(|i| {
                let started = Arc::clone(&started);
                Task::new(move || async move {
                    started.lock().push(i);
                    // Early tasks take longest, so a reordering gate would show.
                    tokio::time::sleep(Duration::from_millis(16 - i * 2)).await;
                    Ok(i)
                })
            })
            .collect();

        let results = run_parallel_with_limit(&ctx, 1, tasks).await;

        assert!(results.is_ok());
        assert_eq!(*started.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_with_limit_collects_all_failures() {
        let ctx = ExecutionContext::background();
        let tasks = (1..=6)
            .map(|i| {
                if i % 2 == 0 {
                    Task::fail(TaskError::failed(format!("even {}", i)))
                } else {
                    Task::ok(i)
                }
            })
            .collect();

        let (values, error) = run_parallel_with_limit(&ctx, 2, tasks).await.into_parts();
        let error = error.unwrap();

        assert_eq!(values, vec![Some(1), None, Some(3), None, Some(5), None]);
        assert_eq!(error.to_string(), "task 2: even 2\ntask 4: even 4\ntask 6: even 6");
    }

    #[tokio::test]
    #[should_panic(expected = "limit of at least 1")]
    async fn test_run_parallel_with_zero_limit_panics() {
        let ctx = ExecutionContext::background();
        let _ = run_parallel_with_limit(&ctx, 0, vec![Task::ok(1)]).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_parallel_bounded_uses_context_limit() {
        let options = crate::TaskweaveOptions {
            max_parallel: 2,
            ..Default::default()
        };
        let ctx = ExecutionContext::from_options(&options).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6)
            .map(|i| counting_task(Arc::clone(&running), Arc::clone(&peak), i))
            .collect();

        let results = run_parallel_bounded(&ctx, tasks).await;
        assert!(results.is_ok());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_tasks_in_parallel() {
        let ctx = ExecutionContext::background();
        let tasks = (0..4_u32)
            .map(|i| {
                Task::blocking(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(i * 10)
                })
            })
            .collect();

        let values = run_parallel(&ctx, tasks).await.into_result().unwrap();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }
}
