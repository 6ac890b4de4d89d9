//! Accept loops and shared server state.

use crate::config::Config;
use crate::crypto::keystore::KeyStore;
use crate::error::{MtpError, Result};
use crate::protocol::engine::ProtocolEngine;
use crate::protocol::tags::TagTaxonomy;
use crate::server::limits::ConnectionLimiter;
use crate::server::mailbox::MailboxStore;
use crate::server::session::{self, Session};
use crate::server::tls;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// Shared state handed to every session.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub engine: ProtocolEngine,
    pub mailboxes: MailboxStore,
    pub keystore: Arc<KeyStore>,
    pub taxonomy: TagTaxonomy,
    pub limiter: ConnectionLimiter,
}

pub struct MtpServer {
    ctx: Arc<ServerContext>,
}

impl MtpServer {
    pub fn new(config: Config, keystore: Arc<KeyStore>) -> Self {
        let config = Arc::new(config);
        let engine = ProtocolEngine::new(
            keystore.clone(),
            config.server.hashcash_difficulty,
            config.crypto.enabled,
        );
        let ctx = Arc::new(ServerContext {
            config: config.clone(),
            engine,
            mailboxes: MailboxStore::new(),
            keystore,
            taxonomy: TagTaxonomy::new(),
            limiter: ConnectionLimiter::new(config.server.max_connections_per_ip),
        });
        Self { ctx }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Bind the configured plain listener and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.ctx.config.server.listen_addr).await?;
        info!(
            "MMTP server listening on {}",
            self.ctx.config.server.listen_addr
        );
        self.serve(listener).await
    }

    /// Serve on an already-bound plain listener; starts the TLS listener as
    /// a side task when enabled. Tests bind their own listener on an
    /// ephemeral port and call this directly.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if self.ctx.config.tls.enabled {
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = run_tls(ctx).await {
                    error!("TLS listener error: {}", e);
                }
            });
        }

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New connection from {}", addr);
                    let ctx = self.ctx.clone();
                    tokio::spawn(handle_connection(ctx, socket, addr));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn run_tls(ctx: Arc<ServerContext>) -> Result<()> {
    let (cert_path, key_path) = match (&ctx.config.tls.cert_path, &ctx.config.tls.key_path) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        _ => {
            return Err(MtpError::Tls(
                "TLS enabled but cert/key paths are missing".to_string(),
            ))
        }
    };
    let acceptor = TlsAcceptor::from(tls::load_server_config(&cert_path, &key_path)?);

    let listener = TcpListener::bind(&ctx.config.server.tls_listen_addr).await?;
    info!(
        "MMTP TLS server listening on {}",
        ctx.config.server.tls_listen_addr
    );

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                info!("New TLS connection from {}", addr);
                let acceptor = acceptor.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(stream) => handle_connection(ctx, stream, addr).await,
                        Err(e) => warn!(peer = %addr, "TLS handshake failed: {}", e),
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept TLS connection: {}", e);
            }
        }
    }
}

/// Admission control plus session lifetime; the per-IP counter is always
/// released on the way out.
async fn handle_connection<S>(ctx: Arc<ServerContext>, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ip = peer.ip();
    let admitted = ctx.limiter.acquire(ip).await;

    if !admitted {
        let mut stream = stream;
        let frame = json!({
            "status": "ERROR",
            "message": "CapacityError: too many connections from your address",
        });
        if let Err(e) = session::write_frame(&mut stream, &frame).await {
            warn!(peer = %peer, "Failed to send capacity error: {}", e);
        }
        let _ = stream.shutdown().await;
    } else if let Err(e) = Session::new(ctx.clone(), peer).run(stream).await {
        error!(peer = %peer, "Session error: {}", e);
    }

    ctx.limiter.release(ip).await;
}
