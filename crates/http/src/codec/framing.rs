//! Body framing selection for both directions.
//!
//! The boundary of a body is decided once, from the head, before any body byte
//! is read. `Transfer-Encoding` and `Content-Length` together are rejected
//! outright, even when they would happen to agree.

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};

use crate::protocol::{ParseError, PayloadSize};

/// The framing headers of a message, before request/response rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// `Transfer-Encoding` whose final coding is `chunked`
    Chunked,
    /// `Transfer-Encoding` present but not ending in `chunked`
    OtherCoding,
    /// a valid `Content-Length`
    Length(u64),
    /// no framing header at all
    Absent,
}

fn framing(headers: &HeaderMap) -> Result<Framing, ParseError> {
    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length
    let has_te = headers.contains_key(TRANSFER_ENCODING);
    let has_cl = headers.contains_key(CONTENT_LENGTH);

    match (has_te, has_cl) {
        (true, true) => Err(ParseError::ConflictingFraming),
        (true, false) if is_chunked(headers) => Ok(Framing::Chunked),
        (true, false) => Ok(Framing::OtherCoding),
        (false, true) => content_length(headers).map(Framing::Length),
        (false, false) => Ok(Framing::Absent),
    }
}

/// Selects the body framing of an inbound request.
///
/// A request without framing headers has no body, and a request whose transfer
/// coding does not end in `chunked` cannot be delimited at all.
pub(crate) fn request_payload_size(headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    match framing(headers)? {
        Framing::Chunked => Ok(PayloadSize::new_chunked()),
        Framing::OtherCoding => Err(ParseError::invalid_transfer_encoding("chunked must be the final coding of a request")),
        Framing::Length(length) => Ok(PayloadSize::new_length(length)),
        Framing::Absent => Ok(PayloadSize::new_empty()),
    }
}

/// Selects the body framing of an inbound response to a request of `method`.
///
/// Responses to `HEAD` and `1xx`, `204` and `304` responses never carry a body.
/// Anything else without a usable length is read until the peer closes.
pub(crate) fn response_payload_size(method: &Method, status: StatusCode, headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(PayloadSize::new_empty());
    }

    match framing(headers)? {
        Framing::Chunked => Ok(PayloadSize::new_chunked()),
        Framing::OtherCoding | Framing::Absent => Ok(PayloadSize::UntilClose),
        Framing::Length(length) => Ok(PayloadSize::new_length(length)),
    }
}

/// Checks if the Transfer-Encoding header indicates chunked encoding.
///
/// Chunked only frames the body when it is the last coding of the last
/// `Transfer-Encoding` field.
pub(crate) fn is_chunked(headers: &HeaderMap) -> bool {
    const CHUNKED: &[u8] = b"chunked";

    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .last()
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .map(|coding| coding.trim_ascii().eq_ignore_ascii_case(CHUNKED))
        .unwrap_or(false)
}

/// Parses every `Content-Length` field, which must agree on one value.
fn content_length(headers: &HeaderMap) -> Result<u64, ParseError> {
    let mut length: Option<u64> = None;

    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_not_visible| ParseError::invalid_content_length("value can't to_str"))?;

        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::invalid_content_length(format!("value {value} is not a decimal length")));
            }

            let parsed = part.parse::<u64>().map_err(|_not_number| ParseError::invalid_content_length(format!("value {part} is not u64")))?;

            match length {
                Some(existing) if existing != parsed => {
                    return Err(ParseError::invalid_content_length(format!("conflicting values {existing} and {parsed}")));
                }
                _ => length = Some(parsed),
            }
        }
    }

    length.ok_or_else(|| ParseError::invalid_content_length("missing value"))
}
