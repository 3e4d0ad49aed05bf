//! Request and response bodies.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use keepalive_http::protocol::{PayloadItem, PayloadSize};

use crate::error::{BoxError, ClientError};
use crate::pool::Checkout;

/// The body of an outgoing request.
///
/// `Empty` and `Full` bodies can be sent again, which lets a request be
/// retried or answered to an authentication challenge. A `Streaming` body is
/// consumed by the first attempt.
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Full(Bytes),
    Streaming(UnsyncBoxBody<Bytes, BoxError>),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self::Full(bytes.into())
    }

    /// Wraps any body. It is sent with a `Content-Length` when its size hint
    /// is exact, chunked otherwise.
    pub fn streaming<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self::Streaming(body.map_err(Into::into).boxed_unsync())
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Streaming(_))
    }

    /// A copy for another attempt, `None` for a streaming body.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Full(bytes) => Some(Self::Full(bytes.clone())),
            Self::Streaming(_) => None,
        }
    }

    /// The framing this body is sent with.
    pub fn payload_size(&self) -> PayloadSize {
        match self {
            Self::Empty => PayloadSize::Empty,
            Self::Full(bytes) => PayloadSize::Length(bytes.len() as u64),
            Self::Streaming(body) => match body.size_hint().exact() {
                Some(length) => PayloadSize::Length(length),
                None => PayloadSize::Chunked,
            },
        }
    }

    /// The whole body for a replayable one; digest `auth-int` hashes it.
    pub(crate) fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Full(bytes) => Some(bytes),
            Self::Streaming(_) => None,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

impl From<()> for RequestBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(bytes.into())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        Self::Full(s.into())
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        Self::Full(Bytes::from_static(s.as_bytes()))
    }
}

/// The body of a response.
///
/// While it streams from the network it owns the connection the response
/// arrived on. Reading it to the end hands the connection back to the pool;
/// dropping it earlier closes the connection.
pub struct ResponseBody {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Option<Bytes>),
    Connection {
        checkout: Option<Checkout>,
        keep_alive: bool,
        remaining: Option<u64>,
    },
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self { kind: Kind::Full(Some(bytes.into())) }
    }

    pub(crate) fn connection(checkout: Checkout, payload_size: PayloadSize, keep_alive: bool) -> Self {
        let remaining = match payload_size {
            PayloadSize::Length(length) => Some(length),
            _ => None,
        };
        Self { kind: Kind::Connection { checkout: Some(checkout), keep_alive, remaining } }
    }

    /// Id of the connection still streaming this body.
    pub fn connection_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Connection { checkout: Some(checkout), .. } => Some(checkout.id()),
            _ => None,
        }
    }

    /// Reads and drops the rest of the body so the connection can be reused.
    pub async fn discard(mut self) -> Result<(), ClientError> {
        while let Some(frame) = self.frame().await {
            frame?;
        }
        Ok(())
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = ClientError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, ClientError>>> {
        match &mut self.get_mut().kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(bytes) => Poll::Ready(bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Connection { checkout, keep_alive, remaining } => {
                let Some(conn) = checkout.as_mut() else {
                    return Poll::Ready(None);
                };

                if conn.is_pool_closed() {
                    let key = conn.key().clone();
                    checkout.take();
                    return Poll::Ready(Some(Err(ClientError::PoolClosed { key })));
                }

                loop {
                    let item = match ready!(conn.poll_payload(cx)) {
                        Ok(item) => item,
                        Err(e) => {
                            checkout.take();
                            return Poll::Ready(Some(Err(e)));
                        }
                    };

                    return match item {
                        PayloadItem::Chunk(bytes) if bytes.is_empty() => continue,
                        PayloadItem::Chunk(bytes) => {
                            if let Some(remaining) = remaining {
                                *remaining = remaining.saturating_sub(bytes.len() as u64);
                            }
                            Poll::Ready(Some(Ok(Frame::data(bytes))))
                        }
                        PayloadItem::Trailers(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        PayloadItem::Eof => {
                            if let Some(checkout) = checkout.take() {
                                checkout.release(*keep_alive);
                            }
                            Poll::Ready(None)
                        }
                    };
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full(bytes) => bytes.is_none(),
            Kind::Connection { checkout, .. } => checkout.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Full(bytes) => SizeHint::with_exact(bytes.as_ref().map_or(0, |bytes| bytes.len() as u64)),
            Kind::Connection { remaining: Some(remaining), .. } => SizeHint::with_exact(*remaining),
            Kind::Connection { .. } => SizeHint::default(),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("ResponseBody::Empty"),
            Kind::Full(_) => f.write_str("ResponseBody::Full"),
            Kind::Connection { checkout, .. } => f.debug_struct("ResponseBody").field("checkout", checkout).finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{Full, StreamBody};
    use std::convert::Infallible;

    #[test]
    fn framing_follows_the_body_kind() {
        assert_eq!(RequestBody::Empty.payload_size(), PayloadSize::Empty);
        assert_eq!(RequestBody::from("hello").payload_size(), PayloadSize::Length(5));
        assert_eq!(RequestBody::streaming(Full::new(Bytes::from_static(b"abc"))).payload_size(), PayloadSize::Length(3));

        let stream = futures::stream::iter(vec![Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"abc")))]);
        assert_eq!(RequestBody::streaming(StreamBody::new(stream)).payload_size(), PayloadSize::Chunked);
    }

    #[test]
    fn only_buffered_bodies_replay() {
        assert!(RequestBody::from(vec![1, 2, 3]).try_clone().is_some());
        assert!(RequestBody::Empty.is_replayable());

        let streaming = RequestBody::streaming(Full::new(Bytes::from_static(b"abc")));
        assert!(!streaming.is_replayable());
        assert!(streaming.try_clone().is_none());
        assert!(streaming.as_bytes().is_none());
    }

    #[tokio::test]
    async fn buffered_response_body_yields_once() {
        let body = ResponseBody::full("hello");
        assert_eq!(body.size_hint().exact(), Some(5));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
        assert!(ResponseBody::empty().is_end_stream());
    }
}
