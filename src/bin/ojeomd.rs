//! ojeomd: ojeomneo edge daemon.
//!
//! Serves the recommendation-reasons endpoint behind the distributed rate
//! limiter and response cache.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use ojeomneo_edge::ChatReasonGenerator;
use ojeomneo_edge::server::config::Config;
use ojeomneo_edge::server::{App, shutdown_signal};
use ojeomneo_edge::store::{KvStore, MemoryStore};

/// ojeomd: ojeomneo edge service.
#[derive(Parser)]
#[command(name = "ojeomd")]
#[command(version)]
#[command(about = "Rate limiting, response caching and recommendation reasons for ojeomneo")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "OJEOMNEO_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let store = connect_store(&config).await?;

    let api_key = Config::llm_api_key();
    if api_key.is_none() {
        warn!("LLM_API_KEY not set, serving canned reasons");
    }
    let generator = ChatReasonGenerator::new(api_key, &config.llm.model).base_url(&config.llm.base_url);

    let app = App::build(&config, Some(store), Arc::new(generator))?;

    let listener = TcpListener::bind(&config.server.address).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.server.address,
        base_path = %config.server.base_path,
        "ojeomd starting"
    );

    app.serve(listener, shutdown_signal()).await?;
    Ok(())
}

/// Connect the configured store, or fall back to a process-local one.
#[cfg(feature = "redis")]
async fn connect_store(config: &Config) -> ojeomneo_edge::Result<Arc<dyn KvStore>> {
    use ojeomneo_edge::store::{RedisStore, RedisStoreConfig};

    let Some(url) = config.store.url.as_deref() else {
        warn!("no store URL configured, using in-memory store (single instance only)");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let redis_config = RedisStoreConfig::new(url)
        .connection_timeout(config.store_connection_timeout())
        .retries(config.store.retries);
    Ok(Arc::new(RedisStore::connect(&redis_config).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_store(config: &Config) -> ojeomneo_edge::Result<Arc<dyn KvStore>> {
    if config.store.url.is_some() {
        return Err(ojeomneo_edge::EdgeError::Configuration(
            "store.url is set but ojeomd was built without the redis feature".into(),
        ));
    }
    warn!("using in-memory store (single instance only)");
    Ok(Arc::new(MemoryStore::new()))
}
