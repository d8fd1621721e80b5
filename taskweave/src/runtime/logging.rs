//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use super::options::TaskweaveOptions;
use crate::errors::{TaskError, TaskResult};

/// Install a global fmt subscriber filtered by `options.log_filter`.
///
/// Only the first call installs a subscriber; later calls (or a subscriber
/// installed by the host application) are left in place.
///
/// # Errors
///
/// Returns [`TaskError::InvalidArgument`] if the filter directive does not parse.
pub fn init_logging(options: &TaskweaveOptions) -> TaskResult<()> {
    let filter = EnvFilter::try_new(&options.log_filter).map_err(|e| {
        TaskError::InvalidArgument(format!(
            "invalid log filter '{}': {}",
            options.log_filter, e
        ))
    })?;

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("global tracing subscriber already installed, keeping it");
    }

    Ok(())
}
