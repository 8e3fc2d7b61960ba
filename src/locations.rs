use crate::errors::{CodeboxError, CodeboxErrorType, Result};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

pub(crate) fn get_default_storage_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| {
        CodeboxError::new(
            CodeboxErrorType::IOError,
            "Unable to determine the home directory".to_string(),
        )
    })?;
    Ok(base_dirs.home_dir().join("codebox"))
}

/// Resolve the storage directory, creating it if needed.
pub(crate) fn resolve_storage_dir(requested: Option<&Path>) -> Result<PathBuf> {
    let dir = match requested {
        Some(path) => path.to_path_buf(),
        None => get_default_storage_dir()?,
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

pub(crate) fn get_db_dir(storage_dir: &Path) -> PathBuf {
    storage_dir.join(".db")
}

pub(crate) fn get_log_dir(storage_dir: &Path) -> Result<PathBuf> {
    let log_dir = storage_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}
