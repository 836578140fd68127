//! Configuration, paths, and logging setup for the Rendezvous client tools.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_API_BASE_URL, DEFAULT_LOG_LEVEL, DEFAULT_SESSION_PATH};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, parse_level, LogConfig, LogFileWriter};
pub use paths::Paths;
