pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config::{ConfigManager, DatabaseConfig, LogFormat, LoggingConfig, ProjectionConfig, Settings};
pub use context::*;
pub use error::*;
pub use traits::*;
pub use types::*;
