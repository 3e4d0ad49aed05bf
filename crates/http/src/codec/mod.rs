//! HTTP codec module for encoding and decoding HTTP/1.x messages
//!
//! Every codec is a `tokio_util` [`Decoder`](tokio_util::codec::Decoder) or
//! [`Encoder`](tokio_util::codec::Encoder) producing or consuming
//! [`Message`](crate::protocol::Message)s: one head, then payload items until
//! EOF. The same framing code serves both directions.
//!
//! - Server side:
//!   - [`RequestDecoder`]: decodes incoming requests
//!   - [`ResponseEncoder`]: encodes outgoing responses
//! - Client side:
//!   - [`RequestEncoder`]: encodes outgoing requests
//!   - [`ResponseDecoder`]: decodes incoming responses
//!
//! # Example
//!
//! ```no_run
//! use keepalive_http::codec::{RequestDecoder, ResponseEncoder};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut request_buffer = BytesMut::new();
//! let request = decoder.decode(&mut request_buffer);
//!
//! let mut encoder = ResponseEncoder::new();
//! // ... encode response ...
//! ```

mod body;
mod framing;
mod header;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;

pub use body::{PayloadDecoder, PayloadEncoder};
pub use header::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS, HeaderLimits};
pub use request_decoder::RequestDecoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;
pub use response_encoder::ResponseEncoder;
