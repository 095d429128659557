use std::net::ToSocketAddrs;

use anyhow::{Context, Result};
use sourcemap_store_service::config::Config;
use sourcemap_store_service::metric;
use sourcemap_store_service::service::SourceMapStore;

use crate::endpoints;

/// Opens the store and serves HTTP requests until the process is terminated.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // opening the store fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sourcemap-store")
        .enable_all()
        .build()?;

    let store = SourceMapStore::create(&config).context("failed to open source map store")?;

    let socket = (config.host(), config.port)
        .to_socket_addrs()
        .with_context(|| format!("invalid bind address {}:{}", config.host(), config.port))?
        .next()
        .with_context(|| format!("{} does not resolve to an address", config.host()))?;

    runtime.block_on(async {
        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .serve(endpoints::create_app(store).into_make_service())
            .await
    })?;
    tracing::info!("System shutdown complete");

    Ok(())
}
