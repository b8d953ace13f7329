use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{Instrument, info, info_span};

use crate::config::Config;
use crate::handler::Handler;
use crate::http::connection::Connection;

/// Accepts connections forever, one task per client.
pub async fn run<H: Handler>(cfg: &Config, handler: H) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.listen_addr))?;
    info!(addr = %cfg.server.listen_addr, "Listening");

    serve(listener, cfg, handler).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve<H: Handler>(
    listener: TcpListener,
    cfg: &Config,
    handler: H,
) -> anyhow::Result<()> {
    let handler = Arc::new(handler);
    let cfg = Arc::new(cfg.clone());

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "Accepted connection");

        let handler = handler.clone();
        let cfg = cfg.clone();
        tokio::spawn(
            async move {
                let mut conn = Connection::new(socket, &cfg, handler);
                if let Err(e) = conn.run().await {
                    tracing::error!(error = %e, "Connection error");
                }
            }
            .instrument(info_span!("conn", %peer)),
        );
    }
}
