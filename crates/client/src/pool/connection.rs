use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use futures::task::noop_waker_ref;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use keepalive_http::codec::{RequestEncoder, ResponseDecoder};
use keepalive_http::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::io::poll_read_buf;
use tracing::{debug, trace};

use crate::body::RequestBody;
use crate::error::ClientError;
use crate::pool::PoolKey;
use crate::transport::BoxIo;

const READ_CHUNK: usize = 8 * 1024;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Parked in the pool, no exchange in progress.
    Idle,
    /// Loaned out, request being written or response head being read.
    Active,
    /// Response head delivered, body not fully read yet.
    Draining,
}

/// One physical transport plus the framing state of the exchange running on it.
///
/// A connection is owned by exactly one party at a time: the pool while
/// idle, a single [`Checkout`](crate::pool::Checkout) while loaned.
pub struct Connection {
    id: u64,
    key: PoolKey,
    io: BoxIo,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_eof: bool,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    state: ConnState,
    created: Instant,
    last_used: Instant,
    peer_close: bool,
    bytes_sent: u64,
    exchanges: u64,
}

impl Connection {
    pub(crate) fn new(id: u64, key: PoolKey, io: BoxIo) -> Self {
        let now = Instant::now();
        Self {
            id,
            key,
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            read_eof: false,
            encoder: RequestEncoder::new(),
            decoder: ResponseDecoder::new(),
            state: ConnState::Active,
            created: now,
            last_used: now,
            peer_close: false,
            bytes_sent: 0,
            exchanges: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Whether the peer announced it closes after the current message.
    pub fn peer_close(&self) -> bool {
        self.peer_close
    }

    /// Request bytes handed to the transport during the current exchange.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Number of exchanges started on this connection.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub(crate) fn mark_peer_close(&mut self) {
        self.peer_close = true;
    }

    pub(crate) fn set_idle(&mut self) {
        self.state = ConnState::Idle;
        self.last_used = Instant::now();
    }

    /// Whether both codecs sit between two messages and no stray bytes are buffered.
    pub(crate) fn is_clean(&self) -> bool {
        self.encoder.is_idle() && self.decoder.is_idle() && self.read_buf.is_empty() && !self.read_eof
    }

    /// Checks an idle connection before it is loaned out again.
    ///
    /// A connection whose peer already closed it, or that holds bytes nobody
    /// asked for, is not usable.
    pub(crate) fn probe(&mut self) -> bool {
        if !self.is_clean() {
            return false;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut probe = [0u8; 1];
        let mut probe_buf = ReadBuf::new(&mut probe);
        match Pin::new(&mut self.io).poll_read(&mut cx, &mut probe_buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(())) if probe_buf.filled().is_empty() => {
                debug!(key = %self.key, conn_id = self.id, "idle connection closed by peer");
                false
            }
            Poll::Ready(Ok(())) => {
                debug!(key = %self.key, conn_id = self.id, "idle connection received unsolicited bytes");
                false
            }
            Poll::Ready(Err(e)) => {
                debug!(key = %self.key, conn_id = self.id, cause = %e, "idle connection failed");
                false
            }
        }
    }

    /// Serializes one request onto the transport.
    ///
    /// A body with a known size below `coalesce_threshold` leaves together with
    /// the head in a single write. Otherwise the head is flushed first and the
    /// body follows frame by frame.
    pub(crate) async fn write_request(&mut self, head: RequestHeader, body: &mut RequestBody, coalesce_threshold: usize) -> Result<(), ClientError> {
        self.state = ConnState::Active;
        self.bytes_sent = 0;
        self.exchanges += 1;
        self.decoder.set_request_method(head.method().clone());

        let payload_size = body.payload_size();
        trace!(key = %self.key, conn_id = self.id, method = %head.method(), uri = %head.uri(), ?payload_size, "write request");
        self.encode(Message::Header((head, payload_size)))?;

        match body {
            RequestBody::Empty => {
                self.encode(Message::Payload(PayloadItem::Eof))?;
                self.flush().await
            }
            RequestBody::Full(bytes) if bytes.len() < coalesce_threshold => {
                self.encode(Message::Payload(PayloadItem::Chunk(bytes.clone())))?;
                self.encode(Message::Payload(PayloadItem::Eof))?;
                self.flush().await
            }
            RequestBody::Full(bytes) => {
                self.flush().await?;
                self.encode(Message::Payload(PayloadItem::Chunk(bytes.clone())))?;
                self.encode(Message::Payload(PayloadItem::Eof))?;
                self.flush().await
            }
            RequestBody::Streaming(stream) => {
                self.flush().await?;
                loop {
                    let item = match stream.frame().await {
                        Some(Ok(frame)) => match frame.into_data() {
                            Ok(data) => PayloadItem::Chunk(data),
                            Err(frame) => match frame.into_trailers() {
                                Ok(trailers) if payload_size.is_chunked() => PayloadItem::Trailers(trailers),
                                _ => continue,
                            },
                        },
                        Some(Err(e)) => return Err(self.send_error(io::Error::other(e))),
                        None => PayloadItem::Eof,
                    };

                    let last = item.is_eof() || item.is_trailers();
                    self.encode(Message::Payload(item))?;
                    self.flush().await?;
                    if last {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reads the final response head; interim `1xx` responses are skipped.
    pub(crate) async fn read_head(&mut self) -> Result<(ResponseHead, PayloadSize), ClientError> {
        match poll_fn(|cx| self.poll_message(cx)).await? {
            Message::Header((head, payload_size)) => {
                trace!(key = %self.key, conn_id = self.id, status = head.status().as_u16(), ?payload_size, "read response head");
                self.state = ConnState::Draining;
                Ok((head, payload_size))
            }
            Message::Payload(_) => Err(self.protocol_error(ParseError::invalid_body("payload item before response head"))),
        }
    }

    /// Polls the next body item of the response being drained.
    pub(crate) fn poll_payload(&mut self, cx: &mut Context<'_>) -> Poll<Result<PayloadItem, ClientError>> {
        match ready!(self.poll_message(cx))? {
            Message::Payload(item) => Poll::Ready(Ok(item)),
            Message::Header(_) => Poll::Ready(Err(self.protocol_error(ParseError::invalid_body("response head inside a body")))),
        }
    }

    pub(crate) async fn read_payload(&mut self) -> Result<PayloadItem, ClientError> {
        poll_fn(|cx| self.poll_payload(cx)).await
    }

    fn poll_message(&mut self, cx: &mut Context<'_>) -> Poll<Result<Message<(ResponseHead, PayloadSize)>, ClientError>> {
        loop {
            let decoded = if self.read_eof {
                self.decoder.decode_eof(&mut self.read_buf)
            } else {
                self.decoder.decode(&mut self.read_buf)
            };

            match decoded {
                Ok(Some(message)) => return Poll::Ready(Ok(message)),
                Ok(None) if self.read_eof => {
                    return Poll::Ready(Err(ClientError::from_parse(
                        &self.key,
                        self.id,
                        ParseError::incomplete("connection closed before a response"),
                    )));
                }
                Ok(None) => {}
                Err(e) => return Poll::Ready(Err(ClientError::from_parse(&self.key, self.id, e))),
            }

            self.read_buf.reserve(READ_CHUNK);
            let n = match ready!(poll_read_buf(Pin::new(&mut self.io), cx, &mut self.read_buf)) {
                Ok(n) => n,
                Err(e) => return Poll::Ready(Err(ClientError::from_parse(&self.key, self.id, ParseError::io(e)))),
            };
            if n == 0 {
                trace!(key = %self.key, conn_id = self.id, "read eof");
                self.read_eof = true;
            }
        }
    }

    fn encode(&mut self, message: Message<(RequestHeader, PayloadSize), Bytes>) -> Result<(), ClientError> {
        self.encoder.encode(message, &mut self.write_buf).map_err(|e| ClientError::Protocol {
            key: self.key.clone(),
            conn_id: self.id,
            source: HttpError::from(e),
        })
    }

    /// Hands the write buffer to the transport, counting every byte that left.
    async fn flush(&mut self) -> Result<(), ClientError> {
        while self.write_buf.has_remaining() {
            let n = match self.io.write(&self.write_buf).await {
                Ok(0) => return Err(self.send_error(io::ErrorKind::WriteZero.into())),
                Ok(n) => n,
                Err(e) => return Err(self.send_error(e)),
            };
            self.write_buf.advance(n);
            self.bytes_sent += n as u64;
        }

        self.io.flush().await.map_err(|e| self.send_error(e))
    }

    fn send_error(&self, source: io::Error) -> ClientError {
        ClientError::Send { key: self.key.clone(), conn_id: self.id, bytes_sent: self.bytes_sent, source }
    }

    fn protocol_error(&self, e: ParseError) -> ClientError {
        ClientError::Protocol { key: self.key.clone(), conn_id: self.id, source: e.into() }
    }

    /// Drops the transport, closing it.
    pub(crate) fn close(self, reason: &'static str) {
        debug!(key = %self.key, conn_id = self.id, exchanges = self.exchanges, reason, "close connection");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("peer_close", &self.peer_close)
            .field("exchanges", &self.exchanges)
            .finish_non_exhaustive()
    }
}

/// Whether a response with this status is followed by a new protocol instead of HTTP.
pub(crate) fn switches_protocol(status: StatusCode, method: &Method) -> bool {
    status == StatusCode::SWITCHING_PROTOCOLS || (method == Method::CONNECT && status.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsVerification;
    use crate::pool::Scheme;
    use http::Request;
    use indoc::indoc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncWrite;

    fn key() -> PoolKey {
        PoolKey::new(Scheme::Http, "localhost", 80, TlsVerification::Verify)
    }

    fn get(uri: &str) -> RequestHeader {
        RequestHeader::from(Request::get(uri).header("host", "localhost").body(()).unwrap())
    }

    fn post(uri: &str) -> RequestHeader {
        RequestHeader::from(Request::post(uri).header("host", "localhost").body(()).unwrap())
    }

    /// Records every write call, answers reads from a canned response.
    #[derive(Clone, Default)]
    struct RecordingIo {
        response: Arc<Mutex<BytesMut>>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl RecordingIo {
        fn with_response(response: &str) -> Self {
            let io = Self::default();
            io.response.lock().unwrap().extend_from_slice(response.as_bytes());
            io
        }

        fn write_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn written(&self) -> Vec<u8> {
            self.writes.lock().unwrap().concat()
        }
    }

    impl AsyncRead for RecordingIo {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            let mut response = self.response.lock().unwrap();
            let n = response.len().min(buf.remaining());
            buf.put_slice(&response.split_to(n));
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for RecordingIo {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.writes.lock().unwrap().push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn small_body_is_coalesced_into_one_write() {
        let io = RecordingIo::default();
        let mut connection = Connection::new(1, key(), Box::new(io.clone()));
        let mut body = RequestBody::from("hello");

        connection.write_request(post("/echo"), &mut body, 2048).await.unwrap();

        assert_eq!(io.write_calls(), 1);
        assert_eq!(
            String::from_utf8(io.written()).unwrap(),
            "POST /echo HTTP/1.1\r\nhost: localhost\r\ncontent-length: 5\r\n\r\nhello"
        );
        assert_eq!(connection.bytes_sent(), io.written().len() as u64);
    }

    #[tokio::test]
    async fn body_at_threshold_takes_two_writes() {
        let io = RecordingIo::default();
        let mut connection = Connection::new(1, key(), Box::new(io.clone()));
        let mut body = RequestBody::from(vec![b'x'; 2048]);

        connection.write_request(post("/upload"), &mut body, 2048).await.unwrap();

        assert!(io.write_calls() >= 2);
        assert!(io.written().ends_with(&[b'x'; 2048]));
    }

    #[tokio::test]
    async fn streaming_body_is_chunked() {
        let io = RecordingIo::default();
        let mut connection = Connection::new(1, key(), Box::new(io.clone()));
        let stream = futures::stream::iter(vec![
            Ok::<_, io::Error>(http_body::Frame::data(Bytes::from_static(b"hello"))),
            Ok(http_body::Frame::data(Bytes::from_static(b" world"))),
        ]);
        let mut body = RequestBody::streaming(http_body_util::StreamBody::new(stream));

        connection.write_request(post("/upload"), &mut body, 2048).await.unwrap();

        let written = String::from_utf8(io.written()).unwrap();
        assert!(written.starts_with("POST /upload HTTP/1.1\r\nhost: localhost\r\ntransfer-encoding: chunked\r\n\r\n"));
        assert!(written.ends_with("5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn reads_head_then_body() {
        let response = indoc! {"
            HTTP/1.1 200 OK\r
            Content-Length: 5\r
            \r
            hello"};
        let io = RecordingIo::with_response(response);
        let mut connection = Connection::new(1, key(), Box::new(io));

        connection.write_request(get("/"), &mut RequestBody::Empty, 2048).await.unwrap();
        let (head, payload_size) = connection.read_head().await.unwrap();

        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(payload_size, PayloadSize::Length(5));
        assert_eq!(connection.state(), ConnState::Draining);
        assert_eq!(connection.read_payload().await.unwrap(), PayloadItem::Chunk(Bytes::from_static(b"hello")));
        assert!(connection.read_payload().await.unwrap().is_eof());
        assert!(connection.is_clean());
    }

    #[tokio::test]
    async fn conflicting_framing_is_a_protocol_error() {
        let response = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut connection = Connection::new(1, key(), Box::new(RecordingIo::with_response(response)));

        connection.write_request(get("/"), &mut RequestBody::Empty, 2048).await.unwrap();
        let error = connection.read_head().await.unwrap_err();

        assert_eq!(error.kind(), crate::error::ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn close_before_head_is_peer_closed() {
        let mut connection = Connection::new(1, key(), Box::new(RecordingIo::with_response("HTTP/1.1 200 OK\r\n")));

        connection.write_request(get("/"), &mut RequestBody::Empty, 2048).await.unwrap();
        let error = connection.read_head().await.unwrap_err();

        assert_eq!(error.kind(), crate::error::ErrorKind::PeerClosed);
    }

    #[tokio::test]
    async fn probe_detects_closed_peer() {
        let (client, server) = tokio::io::duplex(64);
        let mut connection = Connection::new(1, key(), Box::new(client));
        assert!(connection.probe());

        drop(server);
        assert!(!connection.probe());
    }

    #[tokio::test]
    async fn probe_detects_unsolicited_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut connection = Connection::new(1, key(), Box::new(client));

        server.write_all(b"HTTP/1.1 408 Request Timeout\r\n\r\n").await.unwrap();
        assert!(!connection.probe());
    }
}
