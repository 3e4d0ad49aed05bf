use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame};
use tracing::{debug, error};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// The body of an inbound request, handed to the server handler.
///
/// The handler pulls frames on demand: each poll sends a oneshot sender through
/// the signal channel and [`ReqBodySender`], which owns the read half of the
/// connection, answers it with the next payload item. Nothing is read off the
/// wire that the handler did not ask for until the handler returns, at which
/// point the rest of the body is drained.
pub struct ReqBody {
    signal: mpsc::Sender<oneshot::Sender<PayloadItem>>,
    receiving: Option<oneshot::Receiver<PayloadItem>>,
    finished: bool,
}

impl ReqBody {
    fn new(signal: mpsc::Sender<oneshot::Sender<PayloadItem>>, finished: bool) -> Self {
        Self { signal, receiving: None, finished }
    }

    /// Creates the consumer/producer pair for one request body.
    ///
    /// `payload_size` lets a bodyless request report end-of-stream without a round trip.
    pub fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (tx, receiver) = mpsc::channel(16);
        let req_body = ReqBody::new(tx, payload_size.is_empty());
        let body_sender = ReqBodySender { payload_stream, receiver, eof: false };
        (req_body, body_sender)
    }
}

/// Producer side of [`ReqBody`], reading payload items off the connection.
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: mpsc::Receiver<oneshot::Sender<PayloadItem>>,
    eof: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Answers frame requests from the [`ReqBody`] until the body ends.
    ///
    /// Returns once EOF was read, or when the handler dropped its body.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        loop {
            if self.eof {
                return Ok(());
            }

            let Some(sender) = self.receiver.next().await else {
                // the handler dropped the body, the rest is drained later
                return Ok(());
            };

            let payload_item = self.next_payload_item().await?;
            // the receiver may be gone if the handler was cancelled mid-poll
            let _ = sender.send(payload_item);
        }
    }

    /// Drains any remaining body items so the next request parses cleanly.
    pub async fn skip_body(&mut self) -> Result<(), ParseError> {
        let mut size: usize = 0;
        while !self.eof {
            if let PayloadItem::Chunk(bytes) = self.next_payload_item().await? {
                size += bytes.len();
            }
        }
        if size > 0 {
            debug!(size = size, "skip request body");
        }
        Ok(())
    }

    async fn next_payload_item(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => {
                if payload_item.is_eof() {
                    self.eof = true;
                }
                Ok(payload_item)
            }
            Some(Ok(Message::Header(_header))) => {
                error!("received header from receive body phase");
                Err(ParseError::invalid_body("received header from receive body phase"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::incomplete("connection closed inside request body")),
        }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            if let Some(oneshot_receiver) = &mut self.receiving {
                let result = ready!(oneshot_receiver.poll_unpin(cx));
                self.receiving.take();
                return match result {
                    Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(PayloadItem::Trailers(trailers)) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                    Ok(PayloadItem::Eof) => {
                        self.finished = true;
                        Poll::Ready(None)
                    }
                    Err(_) => {
                        self.finished = true;
                        Poll::Ready(Some(Err(ParseError::invalid_body("parse body canceled"))))
                    }
                };
            }

            match ready!(self.signal.poll_ready_unpin(cx)) {
                Ok(_) => {
                    let (tx, rx) = oneshot::channel();
                    match self.signal.start_send(tx) {
                        Ok(_) => {
                            self.receiving = Some(rx);
                            continue;
                        }
                        Err(e) => return Poll::Ready(Some(Err(ParseError::invalid_body(e)))),
                    }
                }
                Err(e) => return Poll::Ready(Some(Err(ParseError::invalid_body(e)))),
            };
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestDecoder;
    use http_body_util::BodyExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn streams_body_and_trailers() {
        let raw: &[u8] = b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\nX-Sum: 5\r\n\r\n";
        let mut framed = FramedRead::new(raw, RequestDecoder::new());

        let Some(Ok(Message::Header((_, payload_size)))) = framed.next().await else { panic!("expected a head") };

        let (body, mut sender) = ReqBody::body_channel(&mut framed, payload_size);
        let (collected, sent) = tokio::join!(body.collect(), sender.send_body());

        sent.unwrap();
        let collected = collected.unwrap();
        assert_eq!(collected.trailers().unwrap().get("x-sum").unwrap(), "5");
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn skip_body_drains_unread_bytes() {
        let raw: &[u8] = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut framed = FramedRead::new(raw, RequestDecoder::new());

        let Some(Ok(Message::Header((_, payload_size)))) = framed.next().await else { panic!("expected a head") };
        {
            let (body, mut sender) = ReqBody::body_channel(&mut framed, payload_size);
            drop(body);
            sender.send_body().await.unwrap();
            sender.skip_body().await.unwrap();
        }

        let Some(Ok(Message::Header((header, _)))) = framed.next().await else { panic!("expected the second head") };
        assert_eq!(header.uri().path(), "/b");
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let raw: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut framed = FramedRead::new(raw, RequestDecoder::new());

        let Some(Ok(Message::Header((_, payload_size)))) = framed.next().await else { panic!("expected a head") };
        let (body, mut sender) = ReqBody::body_channel(&mut framed, payload_size);

        assert!(body.is_end_stream());
        assert!(body.collect().await.unwrap().to_bytes().is_empty());
        sender.skip_body().await.unwrap();
    }
}
