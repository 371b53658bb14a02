pub mod daemon;
pub mod maintain;
pub mod playlist;
pub mod records;

use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use watchvault_config::{Config, PathManager};
use watchvault_core::{JsonFileBackend, RecordStore};

/// Open the record store backed by the configured JSON file directory.
pub fn open_store(config: &Config, paths: &PathManager) -> Result<RecordStore> {
    let store_dir: PathBuf = config
        .storage
        .data_dir
        .clone()
        .unwrap_or_else(|| paths.store_dir());
    let backend = JsonFileBackend::new(&store_dir, config.storage.quota_bytes)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to open store at {:?}: {}", store_dir, e))?;
    Ok(RecordStore::new(Arc::new(backend)).with_library_removal(config.lifecycle.library_removal))
}

pub fn load_config(paths: &PathManager) -> Result<Config> {
    Config::load(&paths.config_file())
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load configuration: {}", e))
}
