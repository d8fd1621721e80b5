//! Configuration for contexts and runners.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{TaskError, TaskResult};

/// Options for a unit of work.
///
/// Constructed and passed explicitly; nothing here is global. Missing fields
/// take their defaults when deserialized, so the load order is:
/// `Default` → caller-provided values → [`sanitize`](Self::sanitize).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskweaveOptions {
    /// Default admission limit for `run_parallel_bounded`.
    pub max_parallel: usize,
    /// Optional deadline applied by `ExecutionContext::from_options`.
    pub timeout_ms: Option<u64>,
    /// `tracing_subscriber::EnvFilter` directive used by `init_logging`.
    pub log_filter: String,
}

impl Default for TaskweaveOptions {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            timeout_ms: None,
            log_filter: "info".to_string(),
        }
    }
}

impl TaskweaveOptions {
    /// Validate option values.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if:
    /// - `max_parallel` is zero (no task could ever be admitted)
    /// - `log_filter` is empty
    pub fn sanitize(&self) -> TaskResult<()> {
        if self.max_parallel == 0 {
            return Err(TaskError::InvalidArgument(
                "max_parallel must be at least 1".into(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(TaskError::InvalidArgument(
                "log_filter must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Number of tasks the machine can run in parallel, at least 1.
pub(crate) fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = TaskweaveOptions::default();
        assert!(options.max_parallel >= 1);
        assert!(options.timeout().is_none());
        options.sanitize().unwrap();
    }

    #[test]
    fn test_sanitize_rejects_zero_parallelism() {
        let options = TaskweaveOptions {
            max_parallel: 0,
            ..Default::default()
        };
        let err = options.sanitize().unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn test_sanitize_rejects_empty_filter() {
        let options = TaskweaveOptions {
            log_filter: "  ".to_string(),
            ..Default::default()
        };
        assert!(options.sanitize().is_err());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let options: TaskweaveOptions =
            serde_json::from_str(r#"{"max_parallel": 4, "timeout_ms": 1500}"#).unwrap();

        assert_eq!(options.max_parallel, 4);
        assert_eq!(options.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(options.log_filter, "info");
    }
}
