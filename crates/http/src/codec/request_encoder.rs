use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::RequestHeaderEncoder;
use crate::protocol::{Message, PayloadSize, RequestHeader, SendError};

/// Encodes a request head followed by the payload items of its body.
///
/// Client counterpart of [`ResponseEncoder`](crate::codec::ResponseEncoder).
pub struct RequestEncoder {
    header_encoder: RequestHeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl RequestEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether the encoder is between two messages.
    pub fn is_idle(&self) -> bool {
        self.payload_encoder.is_none()
    }
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self { header_encoder: RequestHeaderEncoder, payload_encoder: None }
    }
}

impl<D: Buf> Encoder<Message<(RequestHeader, PayloadSize), D>> for RequestEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(RequestHeader, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((header, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive request head");
                    return Err(SendError::invalid_sequence("request head before the previous body ended"));
                }

                self.header_encoder.encode((header, payload_size), dst)?;
                self.payload_encoder = Some(PayloadEncoder::from(payload_size));
                Ok(())
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect request header but receive payload item");
                    return Err(SendError::invalid_sequence("payload item without a request head"));
                };

                let result = payload_encoder.encode(payload_item, dst);
                if payload_encoder.is_finish() {
                    self.payload_encoder.take();
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadItem;
    use bytes::Bytes;
    use http::Request;

    type RequestMessage = Message<(RequestHeader, PayloadSize), Bytes>;

    #[test]
    fn fixed_length_request() {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();

        let header = RequestHeader::from(Request::post("/echo").header("host", "localhost").body(()).unwrap());
        encoder.encode(RequestMessage::Header((header, PayloadSize::Length(4))), &mut dst).unwrap();
        assert!(!encoder.is_idle());

        encoder.encode(RequestMessage::Payload(PayloadItem::Chunk(Bytes::from_static(b"ping"))), &mut dst).unwrap();
        encoder.encode(RequestMessage::Payload(PayloadItem::Eof), &mut dst).unwrap();
        assert!(encoder.is_idle());

        assert_eq!(&dst[..], b"POST /echo HTTP/1.1\r\nhost: localhost\r\ncontent-length: 4\r\n\r\nping");
    }

    #[test]
    fn bodyless_request_still_needs_eof() {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();

        let header = RequestHeader::from(Request::get("/").body(()).unwrap());
        encoder.encode(RequestMessage::Header((header, PayloadSize::Empty)), &mut dst).unwrap();
        encoder.encode(RequestMessage::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert!(encoder.is_idle());
        assert_eq!(&dst[..], b"GET / HTTP/1.1\r\n\r\n");
    }
}
