//! HTTP body handling module for processing request and response payloads
//!
//! This module encodes and decodes message bodies with each framing strategy.
//!
//! ## Decoders
//! - [`ChunkedDecoder`]: chunked transfer encoded payloads, trailers included
//! - [`LengthDecoder`]: fixed-length payloads
//! - [`PayloadDecoder`]: picks one of the above, or reads until close
//!
//! ## Encoders
//! - [`ChunkedEncoder`]: chunked transfer encoding
//! - [`LengthEncoder`]: fixed-length payloads
//! - [`PayloadEncoder`]: picks one of the above, or writes raw bytes

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
