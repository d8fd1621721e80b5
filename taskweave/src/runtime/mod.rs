//! Runtime configuration and logging setup.

mod logging;
pub(crate) mod options;

pub use logging::init_logging;
pub use options::TaskweaveOptions;
