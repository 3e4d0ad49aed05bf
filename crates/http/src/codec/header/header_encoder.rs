//! HTTP header encoder implementation for serializing HTTP response heads
//!
//! This module encodes a status line and header block into raw bytes, setting
//! the `Content-Length` or `Transfer-Encoding` field that matches the payload
//! size the body will be framed with.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{PayloadSize, ResponseHead, SendError};

/// Initial buffer size allocated for header serialization
pub(crate) const INIT_HEADER_SIZE: usize = 4 * 1024;

const CHUNKED_VALUE: HeaderValue = HeaderValue::from_static("chunked");
const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");

/// Encoder for HTTP response heads implementing the [`Encoder`] trait.
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    /// Encodes the status line and headers into `dst`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP version is not HTTP/1.0 or HTTP/1.1.
    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion(v));
            }
        };

        let status = head.status();
        write!(FastWrite(dst), "{} {} {}\r\n", version, status.as_str(), status.canonical_reason().unwrap_or(""))?;

        set_framing_headers(head.headers_mut(), status, payload_size);
        write_headers(head.headers(), dst);
        Ok(())
    }
}

/// Rewrites the framing fields so they describe `payload_size` and nothing else.
fn set_framing_headers(headers: &mut HeaderMap, status: StatusCode, payload_size: PayloadSize) {
    match payload_size {
        PayloadSize::Length(n) => {
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::CONTENT_LENGTH, n.into());
        }
        PayloadSize::Chunked => {
            headers.remove(header::CONTENT_LENGTH);
            headers.insert(header::TRANSFER_ENCODING, CHUNKED_VALUE);
        }
        PayloadSize::UntilClose => {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
        }
        PayloadSize::Empty => {
            headers.remove(header::TRANSFER_ENCODING);
            // 1xx and 204 responses must not announce a length at all
            if status.is_informational() || status == StatusCode::NO_CONTENT {
                headers.remove(header::CONTENT_LENGTH);
            } else if status != StatusCode::NOT_MODIFIED {
                headers.insert(header::CONTENT_LENGTH, ZERO_VALUE);
            }
        }
    }
}

pub(crate) fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (header_name, header_value) in headers.iter() {
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Fast writer implementation for writing to BytesMut.
///
/// `BytesMut` grows on demand, so writes never fail.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
