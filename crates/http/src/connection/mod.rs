//! The server side of a connection: read a request, call the handler, write
//! the response, and repeat while the connection stays persistent.

mod http_connection;

pub use http_connection::HttpConnection;
