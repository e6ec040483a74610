// Entry point: load configuration, wire up the store/AOF/dispatcher
// stack, and run the accept loop (spec.md §6).

use std::path::PathBuf;
use std::sync::Arc;

use vkv::{Server, ServerConfig};

#[tokio::main]
async fn main() -> vkv_base::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "vkv=info".into()))
        .init();

    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;

    let server = Arc::new(Server::start(config).await?);
    server.serve().await?;
    Ok(())
}
