//! HTTP header decoder implementation for parsing HTTP request heads
//!
//! This module decodes a request-line and its header block from raw bytes into a
//! [`RequestHeader`], then selects the body framing from the header fields.
//!
//! # Limits
//!
//! - Maximum number of headers: [`HeaderLimits::max_headers`] (64 by default)
//! - Maximum head size: [`HeaderLimits::max_header_bytes`] (8KB by default)
//! - Only HTTP/1.0 and HTTP/1.1 are accepted
//!
//! # Implementation Details
//!
//! 1. Parse raw bytes using `httparse`
//! 2. Record header name/value byte ranges
//! 3. Split the head off the buffer and build the typed `http::Request`
//! 4. Determine the payload size from `Transfer-Encoding` / `Content-Length`

use bytes::BytesMut;
use http::Request;
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::framing::request_payload_size;
use crate::codec::header::head::{
    EMPTY_HEADER_INDEX_ARRAY, HeaderIndex, HeaderLimits, MAX_HEADER_CAPACITY, fill_headers, http_version, map_httparse_error,
    uninit_headers,
};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Shortest request that can possibly be complete: `GET / HTTP/1.1\r\n\r\n` minus the path
const MIN_REQUEST_LEN: usize = 14;

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
#[derive(Debug, Clone, Default)]
pub struct HeaderDecoder {
    limits: HeaderLimits,
}

impl HeaderDecoder {
    pub fn new(limits: HeaderLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    /// Attempts to decode a request head from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((header, payload_size)))` if a complete head was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if the head is malformed or exceeds the limits
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_REQUEST_LEN {
            return Ok(None);
        }

        let limits = self.limits;
        let mut req = httparse::Request::new(&mut []);
        let mut headers = uninit_headers();

        let status =
            req.parse_with_uninit_headers(src, &mut headers[..limits.header_slots()]).map_err(|e| map_httparse_error(e, &limits))?;

        match status {
            Status::Complete(body_offset) => {
                trace!(head_size = body_offset, "parsed request head");
                ensure!(body_offset <= limits.max_header_bytes, ParseError::too_large_header(body_offset, limits.max_header_bytes));

                let header_count = req.headers.len();
                let mut header_index: [HeaderIndex; MAX_HEADER_CAPACITY] = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, req.headers, &mut header_index);

                let version = http_version(req.version)?;
                let method = req.method.ok_or(ParseError::InvalidMethod)?;
                let path = req.path.ok_or(ParseError::InvalidUri)?;

                let mut request = Request::new(());
                *request.method_mut() = method.parse().map_err(|_invalid| ParseError::InvalidMethod)?;
                *request.uri_mut() = path.parse().map_err(|_invalid| ParseError::InvalidUri)?;
                *request.version_mut() = version;

                let header_bytes = src.split_to(body_offset).freeze();
                fill_headers(&header_bytes, &header_index[..header_count], request.headers_mut())?;

                let payload_size = request_payload_size(request.headers())?;

                Ok(Some((RequestHeader::from(request), payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= limits.max_header_bytes, ParseError::too_large_header(src.len(), limits.max_header_bytes));
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method, Version};
    use indoc::indoc;

    fn decode(raw: &str) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
        let mut buf = BytesMut::from(raw);
        HeaderDecoder::default().decode(&mut buf)
    }

    #[test]
    fn test_bytes_mut_lens() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let mut bytes = BytesMut::from(str);

        assert_eq!(bytes.len(), str.len());

        let mut header_decoder = HeaderDecoder::default();

        let result = header_decoder.decode(&mut bytes).unwrap();

        assert!(result.is_some());

        assert_eq!(bytes.len(), 3);
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let (header, payload_size) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());

        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().host(), None);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.uri().query(), None);

        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert_eq!(header.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
        assert_eq!(header.headers().get(http::header::USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
    }

    #[test]
    fn from_edge() {
        let str = indoc! {r##"
        GET /index/?a=1&b=2&a=3 HTTP/1.1
        Host: 127.0.0.1:8080
        Connection: keep-alive
        Cache-Control: max-age=0
        sec-ch-ua: "#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109"
        sec-ch-ua-mobile: ?0
        sec-ch-ua-platform: "macOS"
        Upgrade-Insecure-Requests: 1
        User-Agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36 Edg/109.0.1518.52
        Accept: text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9
        Sec-Fetch-Site: none
        Sec-Fetch-Mode: navigate
        Sec-Fetch-User: ?1
        Sec-Fetch-Dest: document
        Accept-Encoding: gzip, deflate, br
        Accept-Language: zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7

        "##};

        let (header, payload_size) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.uri().path(), "/index/");
        assert_eq!(header.uri().query(), Some("a=1&b=2&a=3"));
        assert_eq!(header.headers().len(), 15);
        assert_eq!(header.headers().get(http::header::CONNECTION), Some(&HeaderValue::from_static("keep-alive")));
        assert_eq!(
            header.headers().get("sec-ch-ua"),
            Some(&HeaderValue::from_static(r##""#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109""##))
        );
        assert_eq!(header.headers().get("Sec-Fetch-Dest"), Some(&HeaderValue::from_static("document")));
    }

    #[test]
    fn duplicate_headers_are_preserved_in_order() {
        let str = "POST /form HTTP/1.1\r\nCookie: a=1\r\nContent-Length: 3\r\nCookie: b=2\r\n\r\nabc";

        let (header, payload_size) = decode(str).unwrap().unwrap();

        assert_eq!(payload_size, PayloadSize::Length(3));
        let cookies: Vec<_> = header.headers().get_all(http::header::COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn chunked_request() {
        let str = "POST /upload HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n";
        let (_, payload_size) = decode(str).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Chunked);
    }

    #[test]
    fn get_with_body_keeps_its_framing() {
        let str = "GET /search HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody";
        let (_, payload_size) = decode(str).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(4));
    }

    #[test]
    fn conflicting_framing() {
        let str = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 5\r\n\r\n";
        assert!(matches!(decode(str), Err(ParseError::ConflictingFraming)));
    }

    #[test]
    fn transfer_encoding_not_ending_in_chunked() {
        let str = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked, gzip\r\n\r\n";
        assert!(matches!(decode(str), Err(ParseError::InvalidTransferEncoding { .. })));
    }

    #[test]
    fn http_1_0() {
        let str = "GET /legacy HTTP/1.0\r\nConnection: keep-alive\r\n\r\n";
        let (header, _) = decode(str).unwrap().unwrap();
        assert_eq!(header.version(), Version::HTTP_10);
    }

    #[test]
    fn unsupported_version() {
        let str = "GET / HTTP/2.0\r\nHost: example.com\r\n\r\n";
        assert!(matches!(decode(str), Err(ParseError::InvalidVersion(_))));
    }

    #[test]
    fn obsolete_line_folding_is_rejected() {
        let str = "GET / HTTP/1.1\r\nX-Folded: first\r\n second\r\n\r\n";
        assert!(decode(str).is_err());
    }

    #[test]
    fn whitespace_before_header_name_is_rejected() {
        let str = "GET / HTTP/1.1\r\n Host: example.com\r\n\r\n";
        assert!(decode(str).is_err());
    }

    #[test]
    fn partial_head_needs_more_data() {
        assert!(decode("GET /index.html HTTP/1.1\r\nHost: exa").unwrap().is_none());
    }

    #[test]
    fn head_too_large() {
        let mut str = String::from("GET / HTTP/1.1\r\nX-Big: ");
        str.push_str(&"a".repeat(9 * 1024));
        assert!(matches!(decode(&str), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn too_many_headers() {
        let limits = HeaderLimits { max_headers: 2, ..HeaderLimits::default() };
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
        let result = HeaderDecoder::new(limits).decode(&mut buf);
        assert!(matches!(result, Err(ParseError::TooManyHeaders { .. })));
    }
}
