pub mod config;
pub mod paths;

pub use config::{Config, LibraryRemoval, LifecycleConfig, StorageConfig, default_lifecycle_config};
pub use paths::PathManager;
