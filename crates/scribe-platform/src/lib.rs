mod logging;
mod paths;

pub use logging::{LogOptions, init_logging, set_logging_enabled};
pub use paths::{AppPaths, AppPathsError};
