//! Accept loop tying a listener to the per-connection [`HttpConnection`].

use std::fmt::Display;
use std::sync::Arc;

use http_body::Body;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::HttpConnection;
use crate::handler::Handler;

#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    shutdown: Option<CancellationToken>,
}

impl ServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancelling the token stops the accept loop and closes every open connection.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Server {
        Server { config: self.config, shutdown: self.shutdown.unwrap_or_default() }
    }
}

/// Serves every connection accepted on a listener with the same handler.
///
/// ```no_run
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use keepalive_http::Server;
/// use keepalive_http::handler::make_handler;
/// use keepalive_http::protocol::body::ReqBody;
/// use tokio::net::TcpListener;
///
/// # async fn run() -> std::io::Result<()> {
/// let listener = TcpListener::bind("127.0.0.1:8080").await?;
/// let handler = make_handler(|_req: Request<ReqBody>| async {
///     Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from_static(b"hello"))))
/// });
/// Server::builder().build().serve(listener, Arc::new(handler)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token is cancelled.
    pub async fn serve<H>(&self, listener: TcpListener, handler: Arc<H>)
    where
        H: Handler + 'static,
        H::Error: Send,
        H::RespBody: Body + Unpin + Send,
        <H::RespBody as Body>::Data: Send,
        <H::RespBody as Body>::Error: Display + Send,
    {
        match listener.local_addr() {
            Ok(address) => info!(%address, "start listening"),
            Err(e) => warn!(cause = %e, "start listening on unknown address"),
        }

        loop {
            let (tcp_stream, remote_addr) = select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("shutdown requested, stop accepting");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            if let Err(e) = tcp_stream.set_nodelay(true) {
                debug!(cause = %e, "can't set TCP_NODELAY");
            }

            let handler = Arc::clone(&handler);
            let shutdown = self.shutdown.clone();
            let config = self.config;

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::with_config(reader, writer, &config);
                select! {
                    () = shutdown.cancelled() => {
                        debug!(%remote_addr, "shutdown requested, drop connection");
                    }
                    result = connection.process(handler) => match result {
                        Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                        Err(e) => warn!(%remote_addr, cause = %e, "service has error, connection shutdown"),
                    },
                }
            });
        }
    }
}
