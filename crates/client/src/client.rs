//! The request pipeline: one logical exchange per [`Client::send`].

use std::sync::Arc;
use std::time::Duration;

use http::header::HOST;
use http::request::Parts;
use http::{HeaderValue, Request, Response};
use keepalive_http::protocol::{PayloadSize, RequestHeader, is_reusable, wants_close};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::body::{RequestBody, ResponseBody};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pool::{Checkout, Pool, PoolKey, switches_protocol};
use crate::resolver::{GaiResolver, Resolve};
use crate::transport::{Connect, TcpConnector, TlsConnect};

/// A pooled HTTP/1.1 client. Clones share the pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pool: Pool,
    config: ClientConfig,
}

pub struct ClientBuilder {
    config: ClientConfig,
    resolver: Arc<dyn Resolve>,
    connector: Arc<dyn Connect>,
    tls: Option<Arc<dyn TlsConnect>>,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            resolver: Arc::new(GaiResolver),
            connector: Arc::new(TcpConnector::new()),
            tls: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: impl Resolve) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn connector(mut self, connector: impl Connect) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn tls(mut self, tls: impl TlsConnect) -> Self {
        self.tls = Some(Arc::new(tls));
        self
    }

    /// Builds the client.
    ///
    /// The idle sweep runs on the current tokio runtime. Built outside of one,
    /// the client works without it.
    pub fn build(self) -> Client {
        let pool = Pool::with_parts(self.config.get_pool().clone(), self.resolver, self.connector, self.tls);
        if let Some(period) = self.config.get_idle_sweep_interval() {
            pool.spawn_sweeper(period);
        }
        Client { inner: Arc::new(ClientInner { pool, config: self.config }) }
    }
}

impl Client {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Sends `request` with the configured per-attempt timeout.
    pub async fn send(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError> {
        self.send_timeout(request, self.inner.config.get_attempt_timeout()).await
    }

    /// Sends `request`, bounding each attempt by `attempt_timeout`.
    ///
    /// An attempt covers acquiring a connection, writing the request and
    /// reading the response head; the body is read afterwards through the
    /// returned [`ResponseBody`]. When the transport fails before a single
    /// request byte left, the request is tried once more on a newly established
    /// connection. Any later failure is returned as is.
    pub async fn send_timeout(
        &self,
        request: Request<RequestBody>,
        attempt_timeout: Duration,
    ) -> Result<Response<ResponseBody>, ClientError> {
        let key = PoolKey::from_uri(request.uri(), self.inner.config.get_pool().get_tls_verification())?;
        let (mut parts, mut body) = request.into_parts();
        if !parts.headers.contains_key(HOST) {
            let host = HeaderValue::try_from(key.host_header())
                .map_err(|_invalid| ClientError::invalid_uri(&parts.uri, "host is not a valid header value"))?;
            parts.headers.insert(HOST, host);
        }

        match self.attempt(&key, &parts, &mut body, attempt_timeout, false).await {
            Err(e) if e.is_retryable() => {
                warn!(key = %key, conn_id = e.connection_id(), cause = %e, "request not sent, retry on a fresh connection");
                self.attempt(&key, &parts, &mut body, attempt_timeout, true).await
            }
            result => result,
        }
    }

    /// Sends `request`, giving up with [`ClientError::Canceled`] once `cancel` fires.
    ///
    /// A canceled request that was waiting for a connection leaves the wait
    /// queue; one that was already on a connection closes it.
    pub async fn send_with_cancel(
        &self,
        request: Request<RequestBody>,
        cancel: &CancellationToken,
    ) -> Result<Response<ResponseBody>, ClientError> {
        let key = PoolKey::from_uri(request.uri(), self.inner.config.get_pool().get_tls_verification())?;
        select! {
            biased;
            () = cancel.cancelled() => {
                debug!(key = %key, "request canceled");
                Err(ClientError::Canceled { key })
            }
            result = self.send(request) => result,
        }
    }

    /// Closes the pool: idle connections now, loaned ones when they come back.
    pub fn close(&self) {
        self.inner.pool.close_all();
    }

    async fn attempt(
        &self,
        key: &PoolKey,
        parts: &Parts,
        body: &mut RequestBody,
        attempt_timeout: Duration,
        fresh: bool,
    ) -> Result<Response<ResponseBody>, ClientError> {
        let pool = &self.inner.pool;
        let exchange = async {
            let mut conn = if fresh { pool.acquire_fresh(key).await? } else { pool.acquire(key).await? };
            conn.write_request(request_head(parts), body, self.inner.config.get_coalesce_threshold()).await?;
            let (head, payload_size) = conn.read_head().await?;
            Ok::<_, ClientError>((conn, head, payload_size))
        };

        let (mut conn, head, payload_size) = select! {
            () = pool.shutdown_token().cancelled() => return Err(ClientError::PoolClosed { key: key.clone() }),
            result = tokio::time::timeout(attempt_timeout, exchange) => match result {
                Ok(exchange) => exchange?,
                Err(_) => {
                    warn!(key = %key, timeout = ?attempt_timeout, "attempt timed out");
                    return Err(ClientError::Timeout { key: key.clone(), timeout: attempt_timeout });
                }
            },
        };

        let status = head.status();
        let keep_alive = is_reusable(Some(status), head.headers(), head.version(), false)
            && !wants_close(&parts.headers)
            && !payload_size.is_until_close()
            && !switches_protocol(status, &parts.method);
        if !keep_alive {
            conn.mark_peer_close();
        }
        debug!(
            key = %key,
            conn_id = conn.id(),
            method = %parts.method,
            uri = %parts.uri,
            status = status.as_u16(),
            keep_alive,
            "receive response head"
        );

        let body = match payload_size {
            PayloadSize::Empty | PayloadSize::Length(0) => finish_empty(conn, keep_alive).await?,
            payload_size => ResponseBody::connection(conn, payload_size, keep_alive),
        };
        let (head, ()) = head.into_parts();
        Ok(Response::from_parts(head, body))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("pool", &self.inner.pool).finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder").field("config", &self.config).field("tls", &self.tls.is_some()).finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the end of a bodiless response and gives the connection back at once.
async fn finish_empty(mut conn: Checkout, keep_alive: bool) -> Result<ResponseBody, ClientError> {
    let item = conn.read_payload().await?;
    if item.is_eof() {
        conn.release(keep_alive);
    }
    Ok(ResponseBody::empty())
}

fn request_head(parts: &Parts) -> RequestHeader {
    let mut request = Request::new(());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    RequestHeader::from(request)
}
