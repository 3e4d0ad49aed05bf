//! Inbound request body streaming for the server loop.
//!
//! - [`ReqBody`]: consumer side, implements `http_body::Body` (data and trailer frames)
//! - [`ReqBodySender`]: producer side, reads payload items off the connection
//!
//! The two halves talk through an mpsc channel of oneshot senders, which keeps
//! backpressure: a frame is read only when the handler asks for one. Whatever
//! the handler leaves unread is drained by [`ReqBodySender::skip_body`] so the
//! connection stays usable for the next request.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;
