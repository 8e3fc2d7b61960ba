use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{CodeboxError, Result};
use crate::exec::ExecutorConfig;
use crate::locations::resolve_storage_dir;
use crate::provider::ollama::DEFAULT_OLLAMA_URL;
use crate::script::Limits;

pub(crate) const DEFAULT_PORT: u16 = 7878;
/// The front end's development server.
pub(crate) const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

#[derive(Parser, Debug)]
#[clap(name = "codebox", about = "Local backend for the code sandbox")]
pub(crate) struct Opts {
    #[clap(short, long)]
    pub(crate) version: bool,
    #[clap(short, long, env = "CODEBOX_DEBUG")]
    pub(crate) debug: bool,
    #[clap(short, long, env = "CODEBOX_PORT", default_value_t = DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Where the snapshot database and logs are kept (default ~/codebox)
    #[clap(long, env = "CODEBOX_STORAGE_DIR")]
    pub(crate) storage_dir: Option<PathBuf>,
    #[clap(long, env = "CODEBOX_OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    pub(crate) ollama_url: String,
    #[clap(long, env = "CODEBOX_LOCAL_DELAY_MS", default_value_t = 500)]
    pub(crate) local_delay_ms: u64,
    /// Interpreter steps a local run may take before it is stopped
    #[clap(long, env = "CODEBOX_STEP_LIMIT", default_value_t = 1_000_000)]
    pub(crate) step_limit: u64,
    /// Browser origins allowed to call the API
    #[clap(
        long = "allowed-origin",
        env = "CODEBOX_ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = DEFAULT_ALLOWED_ORIGIN
    )]
    pub(crate) allowed_origins: Vec<String>,
}

/// Resolved settings the server runs with.
#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    pub(crate) debug: bool,
    pub(crate) storage_dir: PathBuf,
    pub(crate) ollama_url: String,
    pub(crate) allowed_origins: Vec<String>,
    pub(crate) executor: ExecutorConfig,
}

/// Reduces `raw` to `scheme://host[:port]`, the form browsers send.
fn normalize_origin(raw: &str) -> Result<String> {
    let origin = reqwest::Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| url.path() == "/" && url.query().is_none() && url.fragment().is_none())
        .map(|url| url.origin().ascii_serialization());
    match origin {
        Some(origin) if origin != "null" => Ok(origin),
        _ => Err(CodeboxError::invalid_input(format!(
            "`{}` is not a usable origin",
            raw
        ))),
    }
}

impl ServerConfig {
    pub(crate) fn from_opts(opts: &Opts) -> Result<ServerConfig> {
        let storage_dir = resolve_storage_dir(opts.storage_dir.as_deref())?;
        let allowed_origins = opts
            .allowed_origins
            .iter()
            .map(|origin| normalize_origin(origin))
            .collect::<Result<Vec<_>>>()?;
        Ok(ServerConfig {
            port: opts.port,
            debug: opts.debug,
            storage_dir,
            ollama_url: opts.ollama_url.clone(),
            allowed_origins,
            executor: ExecutorConfig {
                local_delay: Duration::from_millis(opts.local_delay_ms),
                limits: Limits {
                    max_steps: opts.step_limit,
                    ..Limits::default()
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Opts::try_parse_from(["codebox"]).unwrap();
        assert_eq!(opts.port, DEFAULT_PORT);
        assert_eq!(opts.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(opts.local_delay_ms, 500);
        assert_eq!(opts.step_limit, 1_000_000);
        assert_eq!(opts.allowed_origins, vec![DEFAULT_ALLOWED_ORIGIN]);
        assert!(!opts.version);
    }

    #[test]
    fn flags_resolve_into_config() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("store");
        let opts = Opts::try_parse_from([
            "codebox",
            "--port",
            "9000",
            "--storage-dir",
            storage.to_str().unwrap(),
            "--local-delay-ms",
            "0",
            "--step-limit",
            "10",
            "--debug",
        ])
        .unwrap();
        let config = ServerConfig::from_opts(&opts).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.debug);
        assert!(storage.is_dir());
        assert_eq!(config.executor.local_delay, Duration::ZERO);
        assert_eq!(config.executor.limits.max_steps, 10);
    }

    #[test]
    fn allowed_origins_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let opts = Opts::try_parse_from([
            "codebox",
            "--storage-dir",
            dir.path().to_str().unwrap(),
            "--allowed-origin",
            "http://localhost:3000/,https://Sandbox.Example.com",
        ])
        .unwrap();
        let config = ServerConfig::from_opts(&opts).unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000", "https://sandbox.example.com"]
        );

        for bad in ["*", "file:///tmp/app", "http://localhost:3000/app"] {
            let opts = Opts::try_parse_from([
                "codebox",
                "--storage-dir",
                dir.path().to_str().unwrap(),
                "--allowed-origin",
                bad,
            ])
            .unwrap();
            let err = ServerConfig::from_opts(&opts).unwrap_err();
            assert_eq!(err.error_type, crate::errors::CodeboxErrorType::InvalidInput, "{}", bad);
        }
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(Opts::try_parse_from(["codebox", "--port", "seventy"]).is_err());
    }
}
