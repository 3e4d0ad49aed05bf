//! HTTP head processing module
//!
//! Decoders and encoders for the start-line plus header block of a message,
//! in both directions:
//!
//! - [`HeaderDecoder`]: request heads (server side)
//! - [`ResponseHeaderDecoder`]: response heads (client side)
//! - [`HeaderEncoder`]: response heads (server side)
//! - [`RequestHeaderEncoder`]: request heads (client side)
//!
//! Parsing is zero-copy on top of `httparse`; both decoders enforce the same
//! [`HeaderLimits`].

mod head;
mod header_decoder;
mod header_encoder;
mod request_header_encoder;
mod response_header_decoder;

pub use head::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS, HeaderLimits};
pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
pub(crate) use header_encoder::FastWrite;
pub use request_header_encoder::RequestHeaderEncoder;
pub use response_header_decoder::ResponseHeaderDecoder;
