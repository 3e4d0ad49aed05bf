//! HTTP/1.1 wire codec and keep-alive server loop.
//!
//! This crate holds everything both sides of an HTTP/1.1 connection share, and
//! the server half built on top of it:
//!
//! - [`codec`]: `tokio_util` decoders and encoders for request and response
//!   heads and bodies (content-length, chunked with trailers, close-delimited)
//! - [`protocol`]: message types, error types and the keep-alive rules
//! - [`connection`]: the per-connection server loop
//! - [`handler`]: the [`Handler`](handler::Handler) trait served by that loop
//! - [`Server`]: an accept loop spawning one task per connection
//!
//! The client side lives in the `keepalive-client` crate and reuses the same
//! codecs through [`RequestEncoder`](codec::RequestEncoder) and
//! [`ResponseDecoder`](codec::ResponseDecoder).
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::{BodyExt, Full};
//! use keepalive_http::handler::make_handler;
//! use keepalive_http::protocol::body::ReqBody;
//! use keepalive_http::{Server, ServerConfig};
//! use tokio::net::TcpListener;
//! use tracing::info;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
//!     tracing_subscriber::fmt::init();
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let server = Server::builder().config(ServerConfig::default()).build();
//!     server.serve(listener, Arc::new(make_handler(echo))).await;
//!     Ok(())
//! }
//!
//! async fn echo(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
//!     info!(path = request.uri().path(), "receive request");
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(Full::new(body)))
//! }
//! ```
//!
//! # Limits
//!
//! - HTTP/1.0 and HTTP/1.1 only
//! - request heads are bounded by [`ServerConfig::max_header_bytes`] (8 KiB)
//!   and [`ServerConfig::max_headers`] (64) by default
//! - no TLS on the server side

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod config;
mod server;
mod utils;

pub use config::{DEFAULT_COALESCE_THRESHOLD, DEFAULT_KEEP_ALIVE_TIMEOUT, ServerConfig};
pub use server::{Server, ServerBuilder};
pub(crate) use utils::ensure;
