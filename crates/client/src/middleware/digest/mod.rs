//! HTTP Digest access authentication (RFC 7616), client side.
//!
//! [`DigestAuth`] answers a `401` carrying a `WWW-Authenticate: Digest`
//! challenge by sending the request once more with an `Authorization`
//! header. The challenge is remembered per authority, so later requests to
//! the same server are authorized up front with the next nonce-count.

mod challenge;

pub use challenge::{Algorithm, Challenge, Qop};

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::body::{RequestBody, ResponseBody};
use crate::error::ClientError;
use crate::middleware::{Middleware, SendRequest};

/// User name and password answered to digest challenges.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).finish_non_exhaustive()
    }
}

/// Middleware answering digest challenges with fixed credentials.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    credentials: Credentials,
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { credentials: Credentials::new(username, password) }
    }
}

impl<S: SendRequest> Middleware<S> for DigestAuth {
    type Out = DigestAuthSender<S>;

    fn wrap(&self, inner: S) -> Self::Out {
        DigestAuthSender { inner, credentials: self.credentials.clone(), contexts: Mutex::new(HashMap::new()) }
    }
}

/// The last challenge of one authority and how often its nonce was used.
struct AuthContext {
    challenge: Challenge,
    nonce_count: u32,
}

/// What one `Authorization` header is computed over.
pub(crate) struct Exchange<'a> {
    pub(crate) method: &'a Method,
    /// Request target in origin-form.
    pub(crate) uri: &'a str,
    /// The whole body; `None` when it cannot be read twice.
    pub(crate) body: Option<&'a [u8]>,
}

pub struct DigestAuthSender<S> {
    inner: S,
    credentials: Credentials,
    contexts: Mutex<HashMap<String, AuthContext>>,
}

impl<S> DigestAuthSender<S> {
    /// Times the current nonce of `authority` was used, `None` unless `nonce` is that nonce.
    pub fn nonce_count(&self, authority: &str, nonce: &str) -> Option<u32> {
        let contexts = self.contexts();
        let context = contexts.get(&authority.to_ascii_lowercase())?;
        (context.challenge.nonce() == nonce).then_some(context.nonce_count)
    }

    fn contexts(&self) -> MutexGuard<'_, HashMap<String, AuthContext>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remembers a fresh challenge. A nonce already known keeps its count.
    fn store(&self, authority: &str, challenge: Challenge) {
        let mut contexts = self.contexts();
        match contexts.get_mut(authority) {
            Some(context) if context.challenge.nonce() == challenge.nonce() => context.challenge = challenge,
            _ => {
                debug!(authority, realm = challenge.realm(), algorithm = %challenge.algorithm(), "new digest nonce");
                contexts.insert(authority.to_string(), AuthContext { challenge, nonce_count: 0 });
            }
        }
    }

    /// Builds the `Authorization` header from the stored challenge, taking the next nonce-count.
    ///
    /// A challenge the exchange cannot answer leaves the nonce-count untouched.
    fn authorize(&self, authority: &str, exchange: &Exchange<'_>) -> Option<Result<HeaderValue, ClientError>> {
        let (challenge, nonce_count) = {
            let mut contexts = self.contexts();
            let context = contexts.get_mut(authority)?;
            if let Err(reason) = context.challenge.choose_qop(exchange.body.is_some()) {
                return Some(Err(ClientError::AuthChallenge { authority: authority.to_string(), reason: reason.to_string() }));
            }
            context.nonce_count += 1;
            (context.challenge.clone(), context.nonce_count)
        };

        let cnonce = format!("{:016x}", rand::random::<u64>());
        let value = authorization(&challenge, &self.credentials, exchange, nonce_count, &cnonce)
            .and_then(|value| HeaderValue::try_from(value).map_err(|e| e.to_string()))
            .map_err(|reason| ClientError::AuthChallenge { authority: authority.to_string(), reason });
        Some(value)
    }
}

impl<S> std::fmt::Debug for DigestAuthSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestAuthSender").field("credentials", &self.credentials).finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: SendRequest> SendRequest for DigestAuthSender<S> {
    async fn send_request(&self, mut request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError> {
        let Some(authority) = request.uri().authority().map(|authority| authority.as_str().to_ascii_lowercase()) else {
            return self.inner.send_request(request).await;
        };

        let target = request.uri().path_and_query().map_or("/", |target| target.as_str()).to_string();
        let method = request.method().clone();
        let replay = request.body().try_clone().map(|body| {
            let mut replay = Request::new(body);
            *replay.method_mut() = method.clone();
            *replay.uri_mut() = request.uri().clone();
            *replay.version_mut() = request.version();
            *replay.headers_mut() = request.headers().clone();
            replay
        });

        let exchange = Exchange { method: &method, uri: &target, body: request.body().as_bytes() };
        match self.authorize(&authority, &exchange) {
            Some(Ok(header)) => {
                request.headers_mut().insert(AUTHORIZATION, header);
            }
            Some(Err(e)) => debug!(authority, cause = %e, "cannot authorize up front, send without credentials"),
            None => {}
        }

        let response = self.inner.send_request(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match Challenge::from_headers(response.headers()) {
            None => return Ok(response),
            Some(Ok(challenge)) => challenge,
            Some(Err(reason)) => {
                warn!(authority, reason, "unusable digest challenge");
                return Err(ClientError::AuthChallenge { authority, reason });
            }
        };

        debug!(authority, realm = challenge.realm(), stale = challenge.is_stale(), "receive digest challenge");
        self.store(&authority, challenge);

        let Some(mut retry) = replay else {
            debug!(authority, "request body cannot be replayed, return the challenge");
            return Ok(response);
        };
        if let Err(e) = response.into_body().discard().await {
            debug!(authority, cause = %e, "discard challenge body failed");
        }

        let exchange = Exchange { method: &method, uri: &target, body: retry.body().as_bytes() };
        if let Some(header) = self.authorize(&authority, &exchange) {
            retry.headers_mut().insert(AUTHORIZATION, header?);
        }
        self.inner.send_request(retry).await
    }
}

/// Computes the `response` field (RFC 7616 §3.4.1).
pub(crate) fn response_digest(
    challenge: &Challenge,
    credentials: &Credentials,
    exchange: &Exchange<'_>,
    qop: Option<Qop>,
    nc: &str,
    cnonce: &str,
) -> String {
    let algorithm = challenge.algorithm();
    let h = |data: String| algorithm.hash(data.as_bytes());

    let mut ha1 = h(format!("{}:{}:{}", credentials.username, challenge.realm(), credentials.password));
    if algorithm.is_sess() {
        ha1 = h(format!("{ha1}:{}:{cnonce}", challenge.nonce()));
    }

    let ha2 = match (qop, exchange.body) {
        (Some(Qop::AuthInt), Some(body)) => h(format!("{}:{}:{}", exchange.method, exchange.uri, algorithm.hash(body))),
        _ => h(format!("{}:{}", exchange.method, exchange.uri)),
    };

    match qop {
        Some(qop) => h(format!("{ha1}:{}:{nc}:{cnonce}:{}:{ha2}", challenge.nonce(), qop.as_str())),
        None => h(format!("{ha1}:{}:{ha2}", challenge.nonce())),
    }
}

/// Renders the `Authorization` header value answering `challenge`.
fn authorization(
    challenge: &Challenge,
    credentials: &Credentials,
    exchange: &Exchange<'_>,
    nonce_count: u32,
    cnonce: &str,
) -> Result<String, String> {
    let qop = challenge.choose_qop(exchange.body.is_some())?;
    let nc = format!("{nonce_count:08x}");
    let response = response_digest(challenge, credentials, exchange, qop, &nc, cnonce);

    let mut value = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", algorithm={}, response="{response}""#,
        quote(&credentials.username),
        quote(challenge.realm()),
        quote(challenge.nonce()),
        quote(exchange.uri),
        challenge.algorithm(),
    );
    if let Some(opaque) = challenge.opaque() {
        value.push_str(&format!(r#", opaque="{}""#, quote(opaque)));
    }
    if let Some(qop) = qop {
        value.push_str(&format!(r#", qop={}, nc={nc}, cnonce="{cnonce}""#, qop.as_str()));
    }
    Ok(value)
}

fn quote(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', r#"\""#)
}
