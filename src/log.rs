use crate::errors::{CodeboxError, CodeboxErrorType, Result};
use crate::locations::get_log_dir;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, Registry};

const LOG_RETENTION_DAYS: i64 = 30;

pub(crate) fn init_logging(
    storage_dir: &Path,
    debug: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_file = get_log_location(storage_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let default_level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    // The subscriber should be an append-only file

    let formatter = BunyanFormattingLayer::new("codebox".into(), non_blocking);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatter);
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        CodeboxError::new(CodeboxErrorType::InternalError, e.to_string())
    })?;
    // reqwest and friends still speak `log`
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::warn!("Unable to bridge log records into tracing: {}", e);
    }

    Ok(guard)
}

fn get_log_location(storage_dir: &Path) -> Result<PathBuf> {
    let log_dir = get_log_dir(storage_dir)?;
    let timestamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
    let log_file = log_dir.join(format!("codebox-{}.log", timestamp));
    clean_logfiles(&log_dir)?;
    Ok(log_file)
}

fn clean_logfiles(log_dir: &Path) -> Result<usize> {
    // Logfiles from more than 30 days ago are deleted
    let mut removed = 0;
    for file in std::fs::read_dir(log_dir)? {
        let file = file?;
        let modified = file.metadata()?.modified()?;
        let modified: chrono::DateTime<Utc> = chrono::DateTime::from(modified);
        let duration = Utc::now().signed_duration_since(modified);
        if duration.num_days() > LOG_RETENTION_DAYS {
            std::fs::remove_file(file.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_logs_survive_cleanup() {
        let scratch = tempfile::tempdir().unwrap();
        let log_dir = get_log_dir(scratch.path()).unwrap();
        std::fs::write(log_dir.join("codebox-today.log"), "{}").unwrap();
        assert_eq!(clean_logfiles(&log_dir).unwrap(), 0);
        assert!(log_dir.join("codebox-today.log").exists());
    }

    #[test]
    fn log_location_is_timestamped() {
        let scratch = tempfile::tempdir().unwrap();
        let location = get_log_location(scratch.path()).unwrap();
        let name = location.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("codebox-"));
        assert!(name.ends_with(".log"));
    }
}
