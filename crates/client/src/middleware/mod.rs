//! Middleware wrapped around [`Client::send`](crate::Client::send).
//!
//! A middleware turns one [`SendRequest`] into another with the same
//! signature. It may look at or rewrite the request, call the inner sender
//! zero or more times, and look at or replace the response. Middlewares are
//! stacked with [`Middlewares::and_then`]; the one added last runs outermost.
//!
//! ```no_run
//! use http::{HeaderValue, Request};
//! use http::header::USER_AGENT;
//! use keepalive_client::middleware::{DefaultHeader, DigestAuth, Middleware, Middlewares, SendRequest};
//! use keepalive_client::{Client, RequestBody};
//!
//! # async fn run() -> Result<(), keepalive_client::ClientError> {
//! let sender = Middlewares::default()
//!     .and_then(DefaultHeader::new(USER_AGENT, HeaderValue::from_static("keepalive")))
//!     .and_then(DigestAuth::new("Mufasa", "Circle of Life"))
//!     .wrap(Client::new());
//!
//! let request = Request::get("http://example.org/dir/index.html").body(RequestBody::Empty).unwrap();
//! let response = sender.send_request(request).await?;
//! # Ok(())
//! # }
//! ```

mod default_header;
mod digest;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::body::{RequestBody, ResponseBody};
use crate::client::Client;
use crate::error::ClientError;

pub use default_header::{DefaultHeader, DefaultHeaderSender};
pub use digest::{Algorithm, Challenge, Credentials, DigestAuth, DigestAuthSender, Qop};

/// Anything that turns a request into a response.
#[async_trait]
pub trait SendRequest: Send + Sync {
    async fn send_request(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError>;
}

#[async_trait]
impl SendRequest for Client {
    async fn send_request(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError> {
        self.send(request).await
    }
}

#[async_trait]
impl<S: SendRequest + ?Sized> SendRequest for Arc<S> {
    async fn send_request(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError> {
        self.as_ref().send_request(request).await
    }
}

/// Wraps a sender into another one.
pub trait Middleware<S> {
    type Out;

    fn wrap(&self, inner: S) -> Self::Out;
}

/// A stack of [`Middleware`], applied innermost first.
#[derive(Debug)]
pub struct Middlewares<Head, Tail, S> {
    head: Head,
    tail: Tail,
    _phantom: PhantomData<S>,
}

/// The empty stack, leaving the sender as it is.
pub type IdentityMiddlewares<S> = Middlewares<Identity, Identity, S>;

impl<S> Default for IdentityMiddlewares<S> {
    fn default() -> Self {
        Self { head: Identity, tail: Identity, _phantom: PhantomData }
    }
}

/// A middleware that does not wrap at all.
#[derive(Debug, Clone, Copy)]
pub struct Identity;

impl<S> Middleware<S> for Identity {
    type Out = S;

    #[inline]
    fn wrap(&self, inner: S) -> Self::Out {
        inner
    }
}

impl<Head, Tail, S> Middlewares<Head, Tail, S>
where
    Head: Middleware<S>,
    Tail: Middleware<Head::Out>,
{
    /// Adds `middleware` on the outside of the stack.
    pub fn and_then<M>(self, middleware: M) -> Middlewares<Self, M, S>
    where
        M: Middleware<Tail::Out>,
    {
        Middlewares { head: self, tail: middleware, _phantom: PhantomData }
    }
}

impl<Head, Tail, S> Middleware<S> for Middlewares<Head, Tail, S>
where
    Head: Middleware<S>,
    Tail: Middleware<Head::Out>,
{
    type Out = Tail::Out;

    fn wrap(&self, inner: S) -> Self::Out {
        self.tail.wrap(self.head.wrap(inner))
    }
}
