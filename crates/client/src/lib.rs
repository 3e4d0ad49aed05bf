//! Pooled async HTTP/1.1 client.
//!
//! The client keeps connections alive between requests and hands them out
//! through a keyed pool:
//!
//! - [`Client`]: the request pipeline. Each [`send`](Client::send) acquires a
//!   connection, writes the request, reads the response head and gives the
//!   connection back once the body was read to its end.
//! - [`Pool`]: connection reuse bounded per [`PoolKey`] and globally, with
//!   first-come first-served waiting when the bounds are reached.
//! - [`ResolverCache`]: memoized, coalesced host resolution.
//! - [`middleware`]: wrappers around sending, among them [`DigestAuth`](middleware::DigestAuth).
//!
//! Wire framing comes from the `keepalive-http` crate.
//!
//! # Example
//!
//! ```no_run
//! use http::Request;
//! use http_body_util::BodyExt;
//! use keepalive_client::{Client, RequestBody};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = Client::new();
//!
//! let request = Request::get("http://example.com/").body(RequestBody::Empty)?;
//! let response = client.send(request).await?;
//! println!("status: {}", response.status());
//!
//! let body = response.into_body().collect().await?.to_bytes();
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod config;
mod error;
mod happy_eyeballs;
pub mod middleware;
pub mod pool;
mod resolver;
mod transport;

pub use body::{RequestBody, ResponseBody};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, PoolConfig, TlsVerification};
pub use error::{BoxError, ClientError, ErrorKind};
pub use pool::{Checkout, ConnState, Connection, Pool, PoolKey, PoolStats, Scheme};
pub use resolver::{GaiResolver, Resolve, ResolverCache};
pub use transport::{BoxIo, Connect, Io, TcpConnector, TlsConnect};
