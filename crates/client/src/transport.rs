//! Transport and TLS capabilities the pool builds connections from.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::TlsVerification;
use crate::error::BoxError;

/// A bidirectional byte stream a connection runs on.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxIo = Box<dyn Io>;

/// Opens a raw byte stream to one address.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self, address: SocketAddr) -> io::Result<BoxIo>;
}

/// Plain TCP with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connect for TcpConnector {
    async fn connect(&self, address: SocketAddr) -> io::Result<BoxIo> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }
}

/// Wraps an established stream into an encrypted one.
///
/// The crate ships no TLS implementation; `https` requests fail with a TLS
/// error unless one is configured on the client.
#[async_trait]
pub trait TlsConnect: Send + Sync + 'static {
    async fn handshake(&self, server_name: &str, verification: TlsVerification, io: BoxIo) -> Result<BoxIo, BoxError>;
}

#[derive(Debug)]
pub(crate) struct NoTls;

impl fmt::Display for NoTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no TLS capability configured")
    }
}

impl std::error::Error for NoTls {}
