use bytes::BytesMut;
use http::{Method, StatusCode};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderLimits, ResponseHeaderDecoder};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead};

/// A decoder for HTTP responses, client counterpart of
/// [`RequestDecoder`](crate::codec::RequestDecoder).
///
/// Interim `1xx` responses other than `101 Switching Protocols` are consumed
/// silently; the caller only ever sees the final response head.
pub struct ResponseDecoder {
    header_decoder: ResponseHeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { header_decoder: ResponseHeaderDecoder::new(limits), payload_decoder: None }
    }

    /// Sets the method of the request the next response answers.
    pub fn set_request_method(&mut self, method: Method) {
        self.header_decoder.set_request_method(method);
    }

    /// Whether the decoder is between two messages.
    pub fn is_idle(&self) -> bool {
        self.payload_decoder.is_none()
    }

    fn on_payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(ResponseHead, PayloadSize)>> {
        let item = item?;
        if item.is_eof() {
            self.payload_decoder.take();
        }
        Some(Message::Payload(item))
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::with_limits(HeaderLimits::default())
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = payload_decoder.decode(src)?;
            return Ok(self.on_payload(message));
        }

        loop {
            let Some((head, payload_size)) = self.header_decoder.decode(src)? else {
                return Ok(None);
            };

            let status = head.status();
            if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                debug!(status = status.as_u16(), "skip interim response");
                continue;
            }

            self.payload_decoder = Some(payload_size.into());
            return Ok(Some(Message::Header((head, payload_size))));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = payload_decoder.decode_eof(src)?;
            return Ok(self.on_payload(message));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(ParseError::incomplete("response head ended before its blank line")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn collect_body(decoder: &mut ResponseDecoder, buffer: &mut BytesMut, eof: bool) -> Result<Vec<u8>, ParseError> {
        let mut body = Vec::new();
        loop {
            let message = if eof { decoder.decode_eof(buffer)? } else { decoder.decode(buffer)? };
            match message {
                Some(Message::Payload(PayloadItem::Chunk(bytes))) => body.extend_from_slice(&bytes),
                Some(Message::Payload(PayloadItem::Trailers(_))) => {}
                Some(Message::Payload(PayloadItem::Eof)) => return Ok(body),
                Some(Message::Header(_)) => panic!("unexpected head"),
                None => return Ok(body),
            }
        }
    }

    #[test]
    fn skips_continue() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(&b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok"[..]);

        let Message::Header((head, payload_size)) = decoder.decode(&mut buffer).unwrap().unwrap() else { panic!() };
        assert_eq!(head.status(), StatusCode::CREATED);
        assert_eq!(payload_size, PayloadSize::Length(2));
        assert_eq!(collect_body(&mut decoder, &mut buffer, false).unwrap(), b"ok");
        assert!(decoder.is_idle());
    }

    #[test]
    fn switching_protocols_is_final() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(&b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n"[..]);

        let Message::Header((head, payload_size)) = decoder.decode(&mut buffer).unwrap().unwrap() else { panic!() };
        assert_eq!(head.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(payload_size.is_empty());
    }

    #[test]
    fn chunked_response() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"[..],
        );

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
        assert_eq!(collect_body(&mut decoder, &mut buffer, false).unwrap(), b"hello world");
        assert!(decoder.is_idle());
    }

    #[test]
    fn close_delimited_response() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\nall of "[..]);

        let Message::Header((_, payload_size)) = decoder.decode(&mut buffer).unwrap().unwrap() else { panic!() };
        assert_eq!(payload_size, PayloadSize::UntilClose);

        assert_eq!(
            decoder.decode(&mut buffer).unwrap().unwrap().into_payload_item().unwrap(),
            PayloadItem::Chunk(Bytes::from_static(b"all of "))
        );

        buffer.extend_from_slice(b"this");
        assert_eq!(collect_body(&mut decoder, &mut buffer, true).unwrap(), b"this");
        assert!(decoder.is_idle());
    }

    #[test]
    fn head_response_with_length_has_no_body() {
        let mut decoder = ResponseDecoder::new();
        decoder.set_request_method(Method::HEAD);
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n"[..]);

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().into_payload_item().unwrap().is_eof());
        assert!(buffer.is_empty());
    }

    #[test]
    fn premature_close_in_body() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"[..]);

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_header());
        assert!(collect_body(&mut decoder, &mut buffer, true).unwrap_err().is_incomplete());
    }

    #[test]
    fn premature_close_in_head() {
        let mut decoder = ResponseDecoder::new();
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Len"[..]);
        assert!(decoder.decode_eof(&mut buffer).unwrap_err().is_incomplete());
    }
}
