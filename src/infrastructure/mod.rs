//! Configuration and logging setup shared by the archive services

pub mod config;
pub mod logging;

pub use config::{ArchiverConfig, CompressionConfig, DatabaseConfig, LoggingConfig, VolumeConfig};
pub use logging::init_logging;
