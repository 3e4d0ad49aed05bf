use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, HeaderValue};
use http::{Method, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::config::ServerConfig;
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{
    HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError, has_connection_token, is_reusable,
};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;
const WRITE_BACKPRESSURE_BOUNDARY: usize = 8 * 1024;

/// What the response writer needs to know about the request it answers.
#[derive(Debug, Clone, Copy)]
struct Exchange {
    version: Version,
    head_request: bool,
    keep_alive: bool,
}

/// One accepted connection, serving requests until either side wants it closed.
///
/// Requests are read one at a time: the next head is parsed only once the
/// previous response is fully written and the previous request body drained,
/// so pipelined requests are answered in order. Between requests the
/// connection waits at most the configured keep-alive timeout.
///
/// Responses whose body is known to be smaller than the coalescing threshold
/// are written head and body in a single write. Anything else has its head
/// flushed right away and its body streamed after it.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    keep_alive_timeout: Duration,
    coalesce_threshold: usize,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, &ServerConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: &ServerConfig) -> Self {
        let decoder = RequestDecoder::with_limits(config.header_limits());
        let mut framed_write = FramedWrite::new(writer, ResponseEncoder::new());
        framed_write.set_backpressure_boundary(WRITE_BACKPRESSURE_BOUNDARY.max(config.get_coalesce_threshold() * 2));

        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, READ_BUFFER_CAPACITY),
            framed_write,
            keep_alive_timeout: config.get_keep_alive_timeout(),
            coalesce_threshold: config.get_coalesce_threshold(),
        }
    }

    /// Serves requests until the peer goes away, a message asks for close, or
    /// the keep-alive timeout elapses.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        loop {
            let next = match tokio::time::timeout(self.keep_alive_timeout, self.framed_read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(timeout = ?self.keep_alive_timeout, "keep-alive timeout elapsed, close connection");
                    self.shutdown().await;
                    return Ok(());
                }
            };

            match next {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    let keep_alive = self.do_process(header, payload_size, handler.as_ref()).await?;
                    if !keep_alive {
                        debug!("connection not persistent, close it");
                        self.shutdown().await;
                        return Ok(());
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload item while waiting for a request head");
                    self.send_error_response(StatusCode::BAD_REQUEST).await;
                    return Err(ParseError::invalid_body("payload item without a request head").into());
                }

                Some(Err(e)) => {
                    if e.is_io() {
                        warn!(cause = %e, "read request failed");
                    } else {
                        warn!(cause = %e, "malformed request, answer 400 and close");
                        self.send_error_response(StatusCode::BAD_REQUEST).await;
                    }
                    return Err(e.into());
                }

                None => {
                    debug!("peer closed the connection");
                    return Ok(());
                }
            }
        }
    }

    /// Runs one exchange, returning whether the connection may serve another.
    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<bool, HttpError>
    where
        H: Handler,
        H::RespBody: Body + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let exchange = Exchange {
            version: header.version(),
            head_request: header.method() == Method::HEAD,
            keep_alive: is_reusable(None, header.headers(), header.version(), false),
        };

        if header.expects_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            debug!("receive expect request header, sent continue response");
        }

        let outcome = {
            let (req_body, mut body_sender) = ReqBody::body_channel(&mut self.framed_read, payload_size);
            let request = header.body(req_body);

            // the body is fed to the handler while it runs; a handler waiting for
            // body data and a sender waiting for a frame request would deadlock
            // if driven one after the other
            let outcome = {
                tokio::pin! {
                    let request_handle_future = handler.call(request);
                    let body_sender_future = body_sender.send_body();
                }

                let mut body_done = false;
                loop {
                    select! {
                        biased;
                        response = &mut request_handle_future => break Ok(response),
                        result = &mut body_sender_future, if !body_done => {
                            body_done = true;
                            if let Err(e) = result {
                                break Err(e);
                            }
                        }
                    }
                }
            };

            match outcome {
                Ok(response) => body_sender.skip_body().await.map(|()| response),
                Err(e) => Err(e),
            }
        };

        let response_result = match outcome {
            Ok(response_result) => response_result,
            Err(e) => {
                warn!(cause = %e, "malformed request body, answer 400 and close");
                self.send_error_response(StatusCode::BAD_REQUEST).await;
                return Err(e.into());
            }
        };

        match response_result {
            Ok(response) => self.do_send_response(response, exchange).await,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handle request failed");
                self.do_send_response(build_error_response(StatusCode::INTERNAL_SERVER_ERROR), exchange).await
            }
        }
    }

    async fn do_send_response<T>(&mut self, response: Response<T>, exchange: Exchange) -> Result<bool, HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let (mut parts, mut body) = response.into_parts();
        let status = parts.status;
        let no_content = status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED;

        let payload_size = match body.size_hint().exact() {
            _ if no_content => PayloadSize::Empty,
            Some(length) => PayloadSize::new_length(length),
            None if exchange.version == Version::HTTP_10 => PayloadSize::UntilClose,
            None => PayloadSize::Chunked,
        };

        let keep_alive = exchange.keep_alive
            && !payload_size.is_until_close()
            && is_reusable(Some(status), &parts.headers, Version::HTTP_11, false);

        if !keep_alive {
            if !has_connection_token(&parts.headers, "close") {
                parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));
            }
        } else if exchange.version == Version::HTTP_10 {
            parts.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let bodyless = exchange.head_request || no_content || payload_size.is_empty();
        self.framed_write.encoder_mut().set_head_only(exchange.head_request || no_content);
        let header = Message::<_, T::Data>::Header((ResponseHead::from_parts(parts, ()), payload_size));

        if bodyless {
            self.framed_write.feed(header).await?;
            self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
            return Ok(keep_alive);
        }

        let coalesce = matches!(payload_size, PayloadSize::Length(length) if length < self.coalesce_threshold as u64);
        if coalesce {
            self.framed_write.feed(header).await?;
        } else {
            self.framed_write.send(header).await?;
        }

        loop {
            let payload_item = match body.frame().await {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => PayloadItem::Chunk(data),
                    Err(frame) => match frame.into_trailers() {
                        Ok(trailers) if payload_size.is_chunked() => PayloadItem::Trailers(trailers),
                        Ok(_) => {
                            debug!("drop response trailers, body is not chunked");
                            continue;
                        }
                        Err(_) => continue,
                    },
                },
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => PayloadItem::Eof,
            };

            // trailers end a chunked body by themselves
            let last = payload_item.is_eof() || payload_item.is_trailers();
            if coalesce && !last {
                self.framed_write.feed(Message::Payload(payload_item)).await?;
            } else {
                self.framed_write.send(Message::Payload(payload_item)).await?;
            }

            if last {
                return Ok(keep_alive);
            }
        }
    }

    /// Writes a bodyless error response that closes the connection. Failures are ignored.
    async fn send_error_response(&mut self, status: StatusCode) {
        let exchange = Exchange { version: Version::HTTP_11, head_request: false, keep_alive: false };
        if let Err(e) = self.do_send_response(build_error_response(status), exchange).await {
            debug!(cause = %e, status = status.as_u16(), "can't send error response");
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            debug!(cause = %e, "shutdown connection failed");
        }
    }
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::<Bytes>::new());
    *response.status_mut() = status_code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use http::Request;
    use http_body_util::Full;
    use indoc::indoc;
    use std::convert::Infallible;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Collects everything written and counts write calls.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        written: Arc<Mutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
    }

    impl RecordingWriter {
        fn output(&self) -> String {
            String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.written.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn serve<H>(input: &'static [u8], config: ServerConfig, handler: H) -> (Result<(), HttpError>, RecordingWriter)
    where
        H: Handler,
        H::RespBody: Body + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let writer = RecordingWriter::default();
        let connection = HttpConnection::with_config(input, writer.clone(), &config);
        let result = connection.process(Arc::new(handler)).await;
        (result, writer)
    }

    fn hello_handler() -> impl Handler<RespBody = Full<Bytes>, Error = Infallible> {
        make_handler(|req: Request<ReqBody>| async move {
            let body = format!("hello {}", req.uri().path());
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
        })
    }

    #[tokio::test]
    async fn serves_pipelined_requests_in_order() {
        let input = indoc! {"
            GET /a HTTP/1.1\r
            Host: x\r
            \r
            GET /b HTTP/1.1\r
            Host: x\r
            \r
        "};
        let (result, writer) = serve(input.as_bytes(), ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert_eq!(
            writer.output(),
            "HTTP/1.1 200 OK\r\ncontent-length: 8\r\n\r\nhello /aHTTP/1.1 200 OK\r\ncontent-length: 8\r\n\r\nhello /b"
        );
    }

    #[tokio::test]
    async fn small_response_leaves_in_one_write() {
        let input = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert_eq!(writer.writes(), 1);
    }

    #[tokio::test]
    async fn large_response_streams_after_its_head() {
        let handler = make_handler(|_req: Request<ReqBody>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(vec![b'x'; 4096]))))
        });
        let (result, writer) = serve(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", ServerConfig::default(), handler).await;

        result.unwrap();
        assert!(writer.writes() >= 2);
        assert!(writer.output().starts_with("HTTP/1.1 200 OK\r\ncontent-length: 4096\r\n\r\nxxxx"));
    }

    #[tokio::test]
    async fn head_request_gets_no_body() {
        let (result, writer) = serve(b"HEAD /abc HTTP/1.1\r\nHost: x\r\n\r\n", ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert_eq!(writer.output(), "HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\n");
    }

    #[tokio::test]
    async fn connection_close_ends_after_one_response() {
        let input = b"GET /a HTTP/1.1\r\nConnection: close\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        let output = writer.output();
        assert!(output.contains("connection: close\r\n"));
        assert!(output.ends_with("hello /a"));
    }

    #[tokio::test]
    async fn http10_without_keep_alive_closes() {
        let input = b"GET /a HTTP/1.0\r\n\r\nGET /b HTTP/1.0\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        let output = writer.output();
        assert!(output.contains("connection: close\r\n"));
        assert!(!output.contains("hello /b"));
    }

    #[tokio::test]
    async fn http10_keep_alive_is_echoed() {
        let input = b"GET /a HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert!(writer.output().contains("connection: keep-alive\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let (result, writer) = serve(b"GET / HTTP/1.1\r\nbad header\r\n\r\n", ServerConfig::default(), hello_handler()).await;

        assert!(result.is_err());
        assert_eq!(writer.output(), "HTTP/1.1 400 Bad Request\r\nconnection: close\r\ncontent-length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn conflicting_framing_gets_400() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        assert!(matches!(result, Err(HttpError::RequestError { source: ParseError::ConflictingFraming })));
        assert!(writer.output().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_next_request() {
        let input = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert!(writer.output().ends_with("hello /b"));
    }

    #[tokio::test]
    async fn chunked_request_body_reaches_the_handler() {
        let handler = make_handler(|req: Request<ReqBody>| async move {
            let collected = req.into_body().collect().await?;
            let trailer = collected.trailers().and_then(|t| t.get("x-sum")).cloned();
            let mut response = Response::new(Full::new(collected.to_bytes()));
            if let Some(trailer) = trailer {
                response.headers_mut().insert("x-sum", trailer);
            }
            Ok::<_, ParseError>(response)
        });
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\nX-Sum: 5\r\n\r\n";
        let (result, writer) = serve(input, ServerConfig::default(), handler).await;

        result.unwrap();
        assert_eq!(writer.output(), "HTTP/1.1 200 OK\r\nx-sum: 5\r\ncontent-length: 5\r\n\r\nhello");
    }

    #[tokio::test]
    async fn truncated_request_body_gets_400() {
        let handler = make_handler(|req: Request<ReqBody>| async move {
            let body = req.into_body().collect().await?.to_bytes();
            Ok::<_, ParseError>(Response::new(Full::new(body)))
        });
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel";
        let (result, writer) = serve(input, ServerConfig::default(), handler).await;

        assert!(result.is_err());
        assert!(writer.output().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn expect_continue_is_answered_first() {
        let input = b"PUT / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok";
        let (result, writer) = serve(input, ServerConfig::default(), hello_handler()).await;

        result.unwrap();
        assert!(writer.output().starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn handler_error_gets_500() {
        let handler = make_handler(|_req: Request<ReqBody>| async {
            Err::<Response<Full<Bytes>>, _>(io::Error::other("boom"))
        });
        let (result, writer) = serve(b"GET / HTTP/1.1\r\n\r\n", ServerConfig::default(), handler).await;

        result.unwrap();
        assert_eq!(writer.output(), "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn streaming_response_is_chunked() {
        let handler = make_handler(|_req: Request<ReqBody>| async {
            let body = http_body_util::StreamBody::new(futures::stream::iter(vec![
                Ok::<_, Infallible>(http_body::Frame::data(Bytes::from_static(b"hello"))),
                Ok(http_body::Frame::data(Bytes::from_static(b" world"))),
            ]));
            Ok::<_, Infallible>(Response::new(body))
        });
        let (result, writer) = serve(b"GET / HTTP/1.1\r\n\r\n", ServerConfig::default(), handler).await;

        result.unwrap();
        assert_eq!(
            writer.output(),
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (client, server) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let config = ServerConfig::default().keep_alive_timeout(Duration::from_millis(20));
        let connection = HttpConnection::with_config(reader, writer, &config);

        let result = tokio::time::timeout(Duration::from_secs(5), connection.process(Arc::new(hello_handler()))).await;
        assert!(result.expect("keep-alive timeout should close the connection").is_ok());
        drop(client);
    }
}
