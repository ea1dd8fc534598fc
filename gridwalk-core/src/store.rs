// JSON persistence of scan results

use gridwalk_scanner::ScanResult;
use std::fs::{self, OpenOptions};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Serialize {
        path: String,
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Writes the result as pretty-printed JSON, creating parent directories.
pub fn save_scan_result(result: &ScanResult, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_error(path))?;
    }

    let json = serde_json::to_string_pretty(result).map_err(|source| StoreError::Serialize {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, json).map_err(io_error(path))?;

    info!("Saved {} pages to {}", result.pages.len(), path.display());
    Ok(())
}

pub fn load_scan_result(path: &Path) -> Result<ScanResult, StoreError> {
    let content = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&content).map_err(|source| StoreError::Serialize {
        path: path.display().to_string(),
        source,
    })
}

/// Fails if `path` cannot be opened for writing. A file created by the check
/// is removed again.
pub fn ensure_writable(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_error(path))?;
    }

    let existed = path.exists();
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(io_error(path))?;
    if !existed {
        let _ = fs::remove_file(path);
    }
    Ok(())
}
