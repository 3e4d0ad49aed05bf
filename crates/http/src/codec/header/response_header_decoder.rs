//! Decoder for HTTP response heads.
//!
//! The body framing of a response depends on the request it answers (a `HEAD`
//! response never has a body), so the decoder is told the request method
//! before each response.

use bytes::BytesMut;
use http::{Method, Response, StatusCode};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::framing::response_payload_size;
use crate::codec::header::head::{
    EMPTY_HEADER_INDEX_ARRAY, HeaderIndex, HeaderLimits, MAX_HEADER_CAPACITY, fill_headers, http_version, map_httparse_error,
    uninit_headers,
};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ResponseHead};

/// Shortest response that can possibly be complete: `HTTP/1.1 200\r\n\r\n`
const MIN_RESPONSE_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ResponseHeaderDecoder {
    limits: HeaderLimits,
    request_method: Method,
}

impl Default for ResponseHeaderDecoder {
    fn default() -> Self {
        Self::new(HeaderLimits::default())
    }
}

impl ResponseHeaderDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits, request_method: Method::GET }
    }

    /// Sets the method of the request the next response answers.
    pub fn set_request_method(&mut self, method: Method) {
        self.request_method = method;
    }
}

impl Decoder for ResponseHeaderDecoder {
    type Item = (ResponseHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_RESPONSE_LEN {
            return Ok(None);
        }

        let limits = self.limits;
        let mut resp = httparse::Response::new(&mut []);
        let mut headers = uninit_headers();

        let status = httparse::ParserConfig::default()
            .parse_response_with_uninit_headers(&mut resp, src, &mut headers[..limits.header_slots()])
            .map_err(|e| map_httparse_error(e, &limits))?;

        match status {
            Status::Complete(body_offset) => {
                trace!(head_size = body_offset, "parsed response head");
                ensure!(body_offset <= limits.max_header_bytes, ParseError::too_large_header(body_offset, limits.max_header_bytes));

                let header_count = resp.headers.len();
                let mut header_index: [HeaderIndex; MAX_HEADER_CAPACITY] = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, resp.headers, &mut header_index);

                let version = http_version(resp.version)?;
                let code = resp.code.ok_or(ParseError::InvalidStatus(0))?;
                let status_code = StatusCode::from_u16(code).map_err(|_invalid| ParseError::InvalidStatus(code))?;

                let mut response = Response::new(());
                *response.status_mut() = status_code;
                *response.version_mut() = version;

                let header_bytes = src.split_to(body_offset).freeze();
                fill_headers(&header_bytes, &header_index[..header_count], response.headers_mut())?;

                let payload_size = response_payload_size(&self.request_method, status_code, response.headers())?;

                Ok(Some((response, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= limits.max_header_bytes, ParseError::too_large_header(src.len(), limits.max_header_bytes));
                Ok(None)
            }
        }
    }
}
