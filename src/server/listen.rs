use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};

use crate::server::http::Router;
use crate::server::state::AppState;

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let state = Arc::new(state);
    let router = Router::new(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener at {}", addr))?;
    log::info!(target: "server::init", "TCP listener bound at {}", addr);

    let accept_task = tokio::spawn(accept_loop(listener, router));

    tokio::select! {
        _ = accept_task => {},
        _ = tokio::signal::ctrl_c() => {
            log::info!(target: "server::init", "shutting down");
        },
    }

    Ok(())
}

async fn accept_loop(listener: TcpListener, router: Router) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => continue,
        };
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(_err) = serve_connection(stream, router).await {
                // per-connection errors are not interesting
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, router: Router) -> Result<()> {
    let io = TokioIo::new(stream);
    let service: TowerToHyperService<Router> = TowerToHyperService::new(router);
    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .context("connection failed")?;
    Ok(())
}
