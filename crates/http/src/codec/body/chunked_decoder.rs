//! Decoder implementation for HTTP chunked transfer encoding.
//!
//! This module decodes bodies framed as specified in
//! [RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1).
//!
//! The decoder is strict: the size line must be hex digits followed directly by
//! either `;extensions` or CRLF, chunk data must be followed by CRLF, and the
//! trailer section is parsed as header fields and surfaced to the caller.

use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::codec::Decoder;
use tracing::trace;
use ChunkedState::*;

use crate::protocol::{ParseError, PayloadItem};

/// Maximum size in bytes of the trailer section
const MAX_TRAILER_BYTES: usize = 8 * 1024;

/// Maximum number of trailer fields
const MAX_TRAILER_NUM: usize = 32;

/// A decoder for handling HTTP chunked transfer encoding.
///
/// The decoder processes incoming bytes according to the chunked format:
/// - Each chunk starts with its size in hexadecimal
/// - Followed by optional extensions and CRLF
/// - Then the chunk data and CRLF
/// - A zero-sized chunk, optional trailer fields and a final CRLF end the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    /// Creates a new ChunkedDecoder instance.
    ///
    /// The decoder starts in the SizeStart state, ready to read the size of the first chunk.
    pub fn new() -> Self {
        Self { state: SizeStart, remaining_size: 0 }
    }

    /// Whether the terminating chunk and trailer section have been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == End
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the first hex digit of the chunk size
    SizeStart,
    /// Read the remaining chunk size digits
    Size,
    /// Skip chunk extensions
    Extension,
    /// Read LF after chunk size
    SizeLf,
    /// Read chunk data
    Body,
    /// Read CR after chunk data
    BodyCr,
    /// Read LF after chunk data
    BodyLf,
    /// Read the trailer section after the last chunk
    Trailers,
    /// Final state after the whole body was read
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Decodes chunked transfer encoded data from the input buffer.
    ///
    /// # Returns
    /// - `Ok(Some(PayloadItem::Chunk(bytes)))` when chunk data is available
    /// - `Ok(Some(PayloadItem::Trailers(map)))` once, if the body carried trailer fields
    /// - `Ok(Some(PayloadItem::Eof))` when the final chunk is processed
    /// - `Ok(None)` when more data is needed
    /// - `Err(ParseError)` if the chunked encoding is invalid
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                End => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                Trailers => {
                    return match read_trailers(src)? {
                        Poll::Pending => Ok(None),
                        Poll::Ready(trailers) => {
                            self.state = End;
                            match trailers {
                                Some(trailers) => Ok(Some(PayloadItem::Trailers(trailers))),
                                None => Ok(Some(PayloadItem::Eof)),
                            }
                        }
                    };
                }
                _ => {}
            }

            if src.is_empty() {
                // need more data
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(src, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => return Err(e),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.len() > 0 {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

impl ChunkedState {
    /// Processes the next step in the chunked decoding state machine.
    ///
    /// # Arguments
    /// * `src` - Source buffer containing the chunked data
    /// * `remaining_size` - Tracks remaining bytes in current chunk
    /// * `buf` - Buffer to store decoded chunk data
    fn step(&self, src: &mut BytesMut, remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        match self {
            SizeStart => ChunkedState::read_size_start(src, remaining_size),
            Size => ChunkedState::read_size(src, remaining_size),
            Extension => ChunkedState::read_extension(src),
            SizeLf => ChunkedState::read_size_lf(src, remaining_size),
            Body => ChunkedState::read_body(src, remaining_size, buf),
            BodyCr => ChunkedState::read_body_cr(src),
            BodyLf => ChunkedState::read_body_lf(src),
            Trailers => Poll::Ready(Ok(Trailers)),
            End => Poll::Ready(Ok(End)),
        }
    }

    /// A size line must start with a hex digit.
    fn read_size_start(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, ParseError>> {
        let b = try_next_byte!(src);
        match hex_value(b) {
            Some(digit) => {
                *size_per_chunk = digit;
                Poll::Ready(Ok(Size))
            }
            None => Poll::Ready(Err(ParseError::invalid_chunk("chunk size line must start with a hex digit"))),
        }
    }

    /// Reads the chunk size digit by digit until `;` or CR.
    ///
    /// # State Transitions
    /// - On hex digit: Stay in Size state to read more digits
    /// - On semicolon: Transition to Extension state to handle chunk extensions
    /// - On CR: Transition to SizeLf state to finish size line
    /// - On anything else, whitespace included: Return error
    fn read_size(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b => match hex_value(b) {
                Some(digit) => match size_per_chunk.checked_mul(16).and_then(|size| size.checked_add(digit)) {
                    Some(size) => {
                        *size_per_chunk = size;
                        Poll::Ready(Ok(Size))
                    }
                    None => Poll::Ready(Err(ParseError::invalid_chunk("invalid overflow chunked length"))),
                },
                None => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size line: Invalid Size"))),
            },
        }
    }

    /// Processes chunk extensions, which are ignored.
    ///
    /// Extensions end at CRLF; a bare LF inside them is rejected.
    fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk extension contains newline"))),
            _ => Poll::Ready(Ok(Extension)),
        }
    }

    /// Validates the LF byte after the chunk size line.
    ///
    /// # State Transitions
    /// - On LF with size 0: Move to Trailers state
    /// - On LF with size > 0: Move to Body state to read chunk data
    /// - On any other byte: Return error
    fn read_size_lf(src: &mut BytesMut, size_per_chunk: &mut u64) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' if *size_per_chunk == 0 => Poll::Ready(Ok(Trailers)),
            b'\n' => Poll::Ready(Ok(Body)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size LF"))),
        }
    }

    /// Reads up to `size_per_chunk` bytes of chunk data.
    fn read_body(src: &mut BytesMut, size_per_chunk: &mut u64, buf: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        if src.is_empty() {
            return Poll::Pending;
        }

        // cap remaining bytes at the max capacity of usize
        let remaining = match *size_per_chunk {
            r if r > usize::MAX as u64 => usize::MAX,
            r => r as usize,
        };

        let read_size = std::cmp::min(remaining, src.len());

        *size_per_chunk -= read_size as u64;
        *buf = Some(src.split_to(read_size).freeze());

        if *size_per_chunk > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    fn read_body_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(BodyLf)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk body CR"))),
        }
    }

    fn read_body_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(SizeStart)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk body LF"))),
        }
    }
}

fn hex_value(b: u8) -> Option<u64> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u64),
        b'a'..=b'f' => Some((b + 10 - b'a') as u64),
        b'A'..=b'F' => Some((b + 10 - b'A') as u64),
        _ => None,
    }
}

/// Reads the trailer section that follows the zero-size chunk.
///
/// Returns `Ready(None)` for an empty section, `Ready(Some(map))` once the whole
/// section up to its blank line is buffered, and `Pending` until then.
fn read_trailers(src: &mut BytesMut) -> Result<Poll<Option<HeaderMap>>, ParseError> {
    if src.len() < 2 {
        return Ok(Poll::Pending);
    }

    if src.starts_with(b"\r\n") {
        src.advance(2);
        return Ok(Poll::Ready(None));
    }

    if src[0] == b'\n' {
        return Err(ParseError::invalid_chunk("invalid chunk end LF"));
    }

    let Some(end) = src.windows(4).position(|window| window == b"\r\n\r\n") else {
        if src.len() > MAX_TRAILER_BYTES {
            return Err(ParseError::invalid_trailer(format!("trailer section exceed the limit {MAX_TRAILER_BYTES}")));
        }
        return Ok(Poll::Pending);
    };

    let section = src.split_to(end + 4).freeze();
    let mut headers = [httparse::EMPTY_HEADER; MAX_TRAILER_NUM];
    let fields = match httparse::parse_headers(&section, &mut headers) {
        Ok(httparse::Status::Complete((_, fields))) => fields,
        Ok(httparse::Status::Partial) => return Err(ParseError::invalid_trailer("incomplete trailer section")),
        Err(e) => return Err(ParseError::invalid_trailer(e)),
    };

    let mut trailers = HeaderMap::with_capacity(fields.len());
    for field in fields.iter() {
        let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(ParseError::invalid_trailer)?;
        let value = HeaderValue::from_bytes(field.value).map_err(ParseError::invalid_trailer)?;
        trailers.append(name, value);
    }

    trace!(count = trailers.len(), "read chunked trailers");
    Ok(Poll::Ready(Some(trailers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Vec<PayloadItem>, ParseError> {
        let mut buffer = BytesMut::from(input);
        let mut decoder = ChunkedDecoder::new();
        let mut items = vec![];
        while let Some(item) = decoder.decode(&mut buffer)? {
            let eof = item.is_eof();
            items.push(item);
            if eof {
                break;
            }
        }
        Ok(items)
    }

    #[test]
    fn test_basic() {
        let mut buffer: BytesMut = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_chunk());
        assert_eq!(item.as_bytes().unwrap(), &Bytes::from_static(b"1234567890abcdef"));

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_eof());
        assert!(decoder.is_finished());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_chunks() {
        let items = decode_all(b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n").unwrap();
        assert_eq!(
            items,
            vec![
                PayloadItem::Chunk(Bytes::from_static(b"hello")),
                PayloadItem::Chunk(Bytes::from_static(b", world")),
                PayloadItem::Eof
            ]
        );
    }

    #[test]
    fn test_chunks_with_extensions() {
        let items = decode_all(b"5;chunk-ext=value\r\nhello\r\n0;last\r\n\r\n").unwrap();
        assert_eq!(items, vec![PayloadItem::Chunk(Bytes::from_static(b"hello")), PayloadItem::Eof]);
    }

    #[test]
    fn test_chunks_with_trailers() {
        let items = decode_all(b"5\r\nhello\r\n0\r\nChecksum: abc\r\nExpires: never\r\n\r\n").unwrap();

        assert_eq!(items.len(), 3);
        let PayloadItem::Trailers(trailers) = &items[1] else { panic!("expected trailers, got {:?}", items[1]) };
        assert_eq!(trailers.get("checksum").unwrap(), "abc");
        assert_eq!(trailers.get("expires").unwrap(), "never");
        assert!(items[2].is_eof());
    }

    #[test]
    fn test_trailers_arrive_in_pieces() {
        let mut buffer = BytesMut::from(&b"0\r\nChecksum: a"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"bc\r\n\r\nNEXT");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_trailers());
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"NEXT");
    }

    #[test]
    fn test_bad_trailer_is_rejected() {
        let result = decode_all(b"0\r\nnot a header line\r\n\r\n");
        assert!(matches!(result, Err(ParseError::InvalidTrailer { .. })));
    }

    #[test]
    fn test_incomplete_chunk() {
        let mut buffer: BytesMut = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hel"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"lo"));

        let eof = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(decode_all(b"xyz\r\n").is_err());
        assert!(decode_all(b"chunked123\r\n").is_err());
        assert!(decode_all(b"\r\n").is_err());
    }

    #[test]
    fn test_whitespace_after_size_is_rejected() {
        assert!(matches!(decode_all(b"5 \r\nhello\r\n0\r\n\r\n"), Err(ParseError::InvalidChunk { .. })));
        assert!(matches!(decode_all(b" 5\r\nhello\r\n0\r\n\r\n"), Err(ParseError::InvalidChunk { .. })));
    }

    #[test]
    fn test_newline_in_extension_is_rejected() {
        assert!(matches!(decode_all(b"5;ext\nhello\r\n0\r\n\r\n"), Err(ParseError::InvalidChunk { .. })));
    }

    #[test]
    fn test_bare_lf_is_rejected() {
        assert!(decode_all(b"5\nhello\r\n0\r\n\r\n").is_err());
        assert!(decode_all(b"5\r\nhello\n0\r\n\r\n").is_err());
    }

    #[test]
    fn test_size_overflow() {
        assert!(matches!(decode_all(b"fffffffffffffffff\r\n"), Err(ParseError::InvalidChunk { .. })));
    }

    #[test]
    fn test_missing_crlf() {
        let mut buffer: BytesMut = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));

        let result = decoder.decode(&mut buffer);
        assert!(result.is_err());
    }

    #[test]
    fn test_large_chunk() {
        let size = 1024 * 1024;
        let mut data = Vec::with_capacity(size + 16);
        data.extend(format!("{:x}\r\n", size).into_bytes());
        data.extend(vec![b'A'; size]);
        data.extend(b"\r\n0\r\n\r\n");

        let mut buffer = BytesMut::from(&data[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap().len(), size);
        assert!(chunk.as_bytes().unwrap().iter().all(|&b| b == b'A'));

        let eof = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());
    }

    #[test]
    fn test_zero_size_chunk() {
        let items = decode_all(b"0\r\n\r\n").unwrap();
        assert_eq!(items, vec![PayloadItem::Eof]);
    }
}
