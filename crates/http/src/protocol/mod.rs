//! Core HTTP protocol abstractions.
//!
//! This module provides the building blocks shared by the server loop and the
//! client pipeline: message and payload types, request/response heads, the
//! keep-alive decision and the error types.
//!
//! # Architecture
//!
//! - **Message Handling** ([`message`]): Core message types and payload processing
//!   - [`Message`]: Represents either a head or a payload item
//!   - [`PayloadItem`]: A body chunk, the trailer fields or EOF
//!   - [`PayloadSize`]: How the body boundary is determined
//!
//! - **Heads** ([`request`], [`response`]): [`RequestHeader`] and [`ResponseHead`]
//!
//! - **Persistence** ([`keep_alive`]): [`is_reusable`] decides if a transport may
//!   carry another exchange
//!
//! - **Body Streaming** ([`body`]): [`body::ReqBody`], the inbound request body
//!   handed to server handlers
//!
//! - **Error Handling** ([`error`]):
//!   - [`HttpError`]: Top-level error type
//!   - [`ParseError`]: Malformed or truncated inbound messages
//!   - [`SendError`]: Failures while serializing outbound messages

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;

mod keep_alive;
pub use keep_alive::has_connection_token;
pub use keep_alive::is_reusable;
pub use keep_alive::is_upgrade;
pub use keep_alive::wants_close;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
