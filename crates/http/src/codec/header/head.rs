//! Pieces shared by the request and response head decoders.

use std::mem::MaybeUninit;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::protocol::ParseError;

/// Hard upper bound of header fields one head may carry, whatever the limits say.
pub(crate) const MAX_HEADER_CAPACITY: usize = 128;

/// Default number of header fields allowed in a head
pub const DEFAULT_MAX_HEADERS: usize = 64;

/// Default size in bytes allowed for the entire head
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Size limits applied while parsing a message head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    pub max_header_bytes: usize,
    pub max_headers: usize,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self { max_header_bytes: DEFAULT_MAX_HEADER_BYTES, max_headers: DEFAULT_MAX_HEADERS }
    }
}

impl HeaderLimits {
    pub(crate) fn header_slots(&self) -> usize {
        self.max_headers.clamp(1, MAX_HEADER_CAPACITY)
    }
}

pub(crate) fn uninit_headers<'a>() -> [MaybeUninit<httparse::Header<'a>>; MAX_HEADER_CAPACITY] {
    [const { MaybeUninit::uninit() }; MAX_HEADER_CAPACITY]
}

/// Stores the byte range positions of a header's name and value within the original buffer.
///
/// Recording positions lets the decoder split the head off the read buffer once
/// and slice every value out of it without copying.
#[derive(Clone, Copy)]
pub(crate) struct HeaderIndex {
    /// Start and end byte positions of the header name
    pub(crate) name: (usize, usize),
    /// Start and end byte positions of the header value
    pub(crate) value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

pub(crate) const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_CAPACITY] = [EMPTY_HEADER_INDEX; MAX_HEADER_CAPACITY];

impl HeaderIndex {
    /// Records the byte positions of header names and values from the parsed headers.
    pub(crate) fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}

/// Appends every recorded field to `headers`, preserving order and duplicates.
pub(crate) fn fill_headers(header_bytes: &Bytes, indices: &[HeaderIndex], headers: &mut HeaderMap) -> Result<(), ParseError> {
    headers.reserve(indices.len());
    for index in indices {
        let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
        let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
        headers.append(name, value);
    }
    Ok(())
}

/// Maps the minor version reported by `httparse`; only HTTP/1.0 and HTTP/1.1 are spoken.
pub(crate) fn http_version(version: Option<u8>) -> Result<Version, ParseError> {
    match version {
        Some(0) => Ok(Version::HTTP_10),
        Some(1) => Ok(Version::HTTP_11),
        _ => Err(ParseError::InvalidVersion(version)),
    }
}

pub(crate) fn map_httparse_error(e: httparse::Error, limits: &HeaderLimits) -> ParseError {
    match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(limits.header_slots()),
        httparse::Error::Version => ParseError::InvalidVersion(None),
        e => ParseError::invalid_header(e.to_string()),
    }
}
