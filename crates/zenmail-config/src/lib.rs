mod error;
mod manager;
mod model;

pub use error::ConfigError;
pub use manager::{apply_env, ConfigManager};
pub use model::*;
