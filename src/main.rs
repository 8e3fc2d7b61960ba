mod assistant;
mod config;
mod errors;
mod exec;
mod fsystem;
mod handlers;
mod locations;
mod log;
mod provider;
mod routes;
mod script;
mod server;
mod settings;
mod storage;
mod templates;
mod workspace;

use clap::Parser;
use std::sync::Arc;

use crate::config::{Opts, ServerConfig};
use crate::locations::get_db_dir;
use crate::provider::{CompletionProvider, OllamaProvider};
use crate::storage::{MemoryStore, SledStore, SnapshotStore};
use crate::workspace::{ProviderFactory, Workspace};

// Allow the server to return its version with a --version flag
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn open_store(config: &ServerConfig) -> Arc<dyn SnapshotStore> {
    let db_dir = get_db_dir(&config.storage_dir);
    match SledStore::open(&db_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(
                "Unable to open snapshot database at {:?}: {}. Nothing will be persisted.",
                db_dir,
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let opts: Opts = Opts::parse();
    if opts.version {
        println!("{}", VERSION);
        return;
    }
    let config = match ServerConfig::from_opts(&opts) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to prepare storage: {}", e);
            std::process::exit(1);
        }
    };
    let _guard = match log::init_logging(&config.storage_dir, config.debug) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };
    tracing::info!("Starting codebox {} with storage at {:?}", VERSION, config.storage_dir);

    let factory: ProviderFactory = Arc::new(|base_url: &str| {
        let provider = OllamaProvider::new(base_url);
        tracing::info!("Ollama client ready for {}", provider.base_url());
        Arc::new(provider) as Arc<dyn CompletionProvider>
    });
    let workspace = Workspace::new(
        open_store(&config),
        &config.ollama_url,
        config.executor,
        factory,
    );
    let srv = server::get_server(
        config.port,
        workspace::shared(workspace),
        config.allowed_origins.clone(),
    );
    if let Err(e) = srv.start().await {
        tracing::error!("Server failed: {}", e);
        eprintln!("Server failed: {}", e);
        std::process::exit(1);
    }
}
