//! Encoder for HTTP request heads.
//!
//! The request-line always carries the origin-form target (path and query);
//! the authority travels in the `Host` field, which the caller fills in.

use std::io::Write;

use bytes::BytesMut;
use http::{HeaderValue, Version, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::header::header_encoder::{FastWrite, INIT_HEADER_SIZE, write_headers};
use crate::protocol::{PayloadSize, RequestHeader, SendError};

const CHUNKED_VALUE: HeaderValue = HeaderValue::from_static("chunked");
const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");

pub struct RequestHeaderEncoder;

impl Encoder<(RequestHeader, PayloadSize)> for RequestHeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (RequestHeader, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut header, payload_size) = item;

        let version = match header.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::UnsupportedVersion(v));
            }
        };

        let target = header.uri().path_and_query().map(|pq| pq.as_str()).filter(|pq| !pq.is_empty()).unwrap_or("/");

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "{} {} {}\r\n", header.method(), target, version)?;

        let need_body = header.need_body();
        let headers = header.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, CHUNKED_VALUE);
            }
            PayloadSize::Empty => {
                headers.remove(header::TRANSFER_ENCODING);
                if need_body {
                    headers.insert(header::CONTENT_LENGTH, ZERO_VALUE);
                } else {
                    headers.remove(header::CONTENT_LENGTH);
                }
            }
            PayloadSize::UntilClose => {
                return Err(SendError::invalid_body("a request body can't be delimited by closing the connection"));
            }
        }

        write_headers(header.headers(), dst);
        Ok(())
    }
}
