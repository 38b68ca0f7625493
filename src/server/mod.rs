pub mod chat;
pub mod http;
pub mod listen;
mod logger;
pub mod magic_link;
pub mod pages;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use log::LevelFilter;

use crate::config::ServerArgs;
use crate::models::ModelCatalog;
use crate::provider::CompletionClient;
use crate::server::state::AppState;

pub fn run(args: ServerArgs) -> Result<()> {
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    logger::init(level);

    if args.api_key.trim().is_empty() {
        log::warn!(
            target: "server::init",
            "no provider API key configured; completion calls will fail gracefully"
        );
    }
    if args.no_auth {
        log::warn!(target: "server::init", "authentication disabled (--no-auth)");
    }

    let backend = Arc::new(CompletionClient::new(
        args.api_url.clone(),
        args.api_key.clone(),
    ));
    let catalog = Arc::new(ModelCatalog::new(
        args.api_url.clone(),
        args.api_key.clone(),
    ));
    let state = AppState::new(&args, backend, catalog.clone());

    let addr = SocketAddr::new(args.host, args.port);
    log::info!(target: "server::init", "driftchat starting");
    log::info!(target: "server::init", "listening on http://{}", addr);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        catalog.spawn_refresh_loop();
        listen::serve(state, addr).await
    })
}
