//! Accept loop (spec §4.1): binds once, then spawns one tokio task per
//! accepted connection. Never touches disk directly — all of that happens
//! behind the [`crate::net::connection::RequestHandler`] it's handed.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::buffer::BufferPool;
use crate::net::connection::{serve_connection, ConnectionConfig, RequestHandler};

pub async fn run<H: RequestHandler + 'static>(
    bind_addr: SocketAddr,
    handler: Arc<H>,
    buffers: BufferPool,
    config: Arc<ConnectionConfig>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "storage node listening");
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let handler = handler.clone();
        let buffers = buffers.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, handler.as_ref(), &buffers, &config).await {
                warn!(%peer_addr, error = %e, "connection ended with error");
            }
        });
    }
}
