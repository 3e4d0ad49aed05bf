//! HTTP request decoder module
//!
//! This module decodes HTTP requests using a streaming approach: a head first,
//! then the payload items of its body.
//!
//! # Example
//!
//! ```no_run
//! use keepalive_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::new();
//! // ... add request data to buffer ...
//! let result = decoder.decode(&mut buffer);
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::{HeaderDecoder, HeaderLimits};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// A decoder for HTTP requests that handles both headers and payload
///
/// The decoder maintains its state through the `payload_decoder` field:
/// - `None`: Currently parsing a head
/// - `Some(PayloadDecoder)`: Currently parsing the body of the last head
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    /// Creates a new `RequestDecoder` with the default head limits
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { header_decoder: HeaderDecoder::new(limits), payload_decoder: None }
    }

    /// Whether the decoder is between two messages.
    pub fn is_idle(&self) -> bool {
        self.payload_decoder.is_none()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::with_limits(HeaderLimits::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    /// Attempts to decode an HTTP request from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Message::Header(_)))`: Successfully decoded request headers
    /// - `Ok(Some(Message::Payload(_)))`: Successfully decoded a payload item
    /// - `Ok(None)`: Need more data to proceed
    /// - `Err(_)`: Encountered a parsing error
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // parse payload if have payload_decoder
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = payload_decoder.decode(src)?;
            return Ok(self.on_payload(message));
        }

        // parse request
        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = payload_decoder.decode_eof(src)?;
            return Ok(self.on_payload(message));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            // the peer closed cleanly between two requests
            None if src.iter().all(|b| b.is_ascii_whitespace()) => Ok(None),
            None => Err(ParseError::incomplete("request head ended before its blank line")),
        }
    }
}

impl RequestDecoder {
    fn on_payload(&mut self, item: Option<PayloadItem>) -> Option<Message<(RequestHeader, PayloadSize)>> {
        let item = item?;
        if item.is_eof() {
            // no need payload decoder in this request now
            self.payload_decoder.take();
        }
        Some(Message::Payload(item))
    }
}
