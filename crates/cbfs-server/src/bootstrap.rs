//! Startup loading of the flat data directory

use std::path::Path;

use bytes::Bytes;
use cbfs_config::{log_server_info, log_server_warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::store::FileStore;

/// Load every regular file directly under `dir` into `store`, keyed by file
/// name. Subdirectories, symlinks and non-UTF-8 names are skipped.
/// Returns the number of files loaded.
pub fn load_directory(store: &FileStore, dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Data directory {} does not exist", dir.display()),
        )
        .into());
    }

    let mut loaded = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("Failed to read {}: {}", dir.display(), e))
        })?;

        let path = entry.path().display().to_string();
        if !entry.file_type().is_file() {
            log_server_warn!("Skipping non-regular entry", path = path.as_str());
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            log_server_warn!("Skipping non-UTF-8 file name", path = path.as_str());
            continue;
        };

        let data = std::fs::read(entry.path())?;
        store.create(name, Bytes::from(data))?;
        loaded += 1;
    }

    let dir = dir.display().to_string();
    log_server_info!("Loaded data directory", dir = dir.as_str(), files = loaded);
    Ok(loaded)
}
