//! RecordRoute orchestration server.

use clap::Parser;
use recordroute_server::config::{Cli, ServerConfig};
use recordroute_server::{logging, routes, state::AppContext};
use recordroute_storage::{DataLayout, PidLock};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::resolve(cli)?;

    // An unwritable data root is fatal before anything else starts.
    let layout = DataLayout::new(&config.data_dir)?;
    logging::init(&layout.log_dir())?;

    // One process per data root.
    let _pid_lock = PidLock::acquire(&layout.pid_file())?;

    let context = AppContext::build(config, layout)?;
    let addr = context.config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, data_dir = %context.config.data_dir.display(), "recordroute server listening");

    let app = routes::router(Arc::clone(&context));
    let shutdown = context.shutdown_signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown => tracing::info!("shutdown requested"),
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
            }
        })
        .await?;

    // Stop any in-flight work before the data root is released.
    context.registry.cancel_all();
    tracing::info!("server stopped");
    Ok(())
}
