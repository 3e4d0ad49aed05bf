use http::Response;

/// A response status line and header block, without the body.
///
/// The server loop hands one to [`ResponseEncoder`](crate::codec::ResponseEncoder)
/// ahead of the body frames; on the client side
/// [`ResponseDecoder`](crate::codec::ResponseDecoder) yields one per response,
/// interim `1xx` heads included, before any payload item.
pub type ResponseHead = Response<()>;
