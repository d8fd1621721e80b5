//! Execution mode of a pipeline phase.

/// How the steps of a phase are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Steps run one after another, each with exclusive access to the request.
    Sequential,
    /// Steps run concurrently and share the request through a `RwLock`.
    Parallel,
}
