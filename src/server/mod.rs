//! HTTPS/2 listener.
//!
//! One task per connection. Each connection owns a cancellation token that
//! is a child of the server's shutdown token, and every request pipeline on
//! it hangs off that token, so closing a connection stops its file reads.

use crate::config::Config;
use crate::http::RequestHandler;
use crate::tls::{self, H2_ALPN};
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// HTTP/2 connection settings
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub window_size: u32,
    pub keep_alive: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_size: config.server.window_size,
            keep_alive: Duration::from_secs(config.server.keep_alive_secs),
        }
    }

    fn builder(&self) -> http2::Builder<TokioExecutor> {
        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder
            .timer(TokioTimer::new())
            .initial_stream_window_size(self.window_size)
            .initial_connection_window_size(self.window_size);
        if !self.keep_alive.is_zero() {
            builder
                .keep_alive_interval(self.keep_alive)
                .keep_alive_timeout(self.keep_alive);
        }
        builder
    }
}

/// Bind the configured address and serve until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let tls_config = tls::server_config(&config).context("Failed to set up TLS")?;
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr().unwrap_or_else(|_| ([0, 0, 0, 0], 0).into()),
        root = %config.file.doc_root.display(),
        compression = config.compression.enabled,
        "listening"
    );

    serve(
        listener,
        TlsAcceptor::from(tls_config),
        Arc::new(RequestHandler::from_config(&config)),
        ConnectionSettings::from_config(&config),
        shutdown,
    )
    .await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<RequestHandler>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let (tcp, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutting down listener");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "cannot set TCP_NODELAY");
        }

        let acceptor = acceptor.clone();
        let handler = handler.clone();
        let conn_token = shutdown.child_token();
        tokio::spawn(async move {
            serve_connection(tcp, peer, acceptor, handler, settings, conn_token).await;
        });
    }
}

async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    handler: Arc<RequestHandler>,
    settings: ConnectionSettings,
    token: CancellationToken,
) {
    // Cancels every pipeline of this connection once it is gone.
    let _guard = token.clone().drop_guard();

    let stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let alpn = stream.get_ref().1.alpn_protocol();
    if alpn != Some(H2_ALPN) {
        tracing::warn!(
            %peer,
            alpn = ?alpn.map(String::from_utf8_lossy),
            "client did not negotiate h2, closing"
        );
        return;
    }
    tracing::debug!(%peer, "connection established");

    let service_token = token.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = handler.clone();
        let token = service_token.clone();
        async move { Ok::<_, Infallible>(handler.handle(req, peer, &token).await) }
    });

    let conn = settings
        .builder()
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = token.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    match res {
        Ok(()) => tracing::debug!(%peer, "connection closed"),
        Err(e) => tracing::debug!(%peer, error = %e, "connection ended with error"),
    }
}
