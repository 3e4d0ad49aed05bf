use std::error::Error;
use std::io;
use std::time::Duration;

use http::Uri;
use keepalive_http::protocol::{HttpError, ParseError};
use thiserror::Error;

use crate::pool::PoolKey;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resolution,
    Connect,
    Tls,
    Timeout,
    Protocol,
    PeerClosed,
    AuthChallenge,
    Send,
    InvalidUri,
    PoolClosed,
    Canceled,
}

/// Every way a request can fail.
///
/// Variants tied to a destination carry its [`PoolKey`], and those tied to a
/// physical connection carry the connection id used in log lines.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("resolve {key} failed: {source}")]
    Resolution {
        key: PoolKey,
        #[source]
        source: io::Error,
    },

    #[error("connect to {key} failed: {source}")]
    Connect {
        key: PoolKey,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake with {key} failed: {source}")]
    Tls {
        key: PoolKey,
        #[source]
        source: BoxError,
    },

    #[error("request to {key} timed out after {timeout:?}")]
    Timeout { key: PoolKey, timeout: Duration },

    #[error("protocol error on connection {conn_id} to {key}: {source}")]
    Protocol {
        key: PoolKey,
        conn_id: u64,
        #[source]
        source: HttpError,
    },

    #[error("connection {conn_id} to {key} closed by peer: {source}")]
    PeerClosed {
        key: PoolKey,
        conn_id: u64,
        #[source]
        source: io::Error,
    },

    #[error("bad digest challenge from {authority}: {reason}")]
    AuthChallenge { authority: String, reason: String },

    #[error("send request on connection {conn_id} to {key} failed after {bytes_sent} bytes: {source}")]
    Send {
        key: PoolKey,
        conn_id: u64,
        bytes_sent: u64,
        #[source]
        source: io::Error,
    },

    #[error("invalid uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: &'static str },

    #[error("connection pool for {key} is closed")]
    PoolClosed { key: PoolKey },

    #[error("request to {key} canceled")]
    Canceled { key: PoolKey },
}

impl ClientError {
    pub(crate) fn invalid_uri(uri: &Uri, reason: &'static str) -> Self {
        Self::InvalidUri { uri: uri.to_string(), reason }
    }

    /// Classifies a read-side failure: truncated messages and transport errors
    /// mean the peer went away, anything else is a framing violation.
    pub(crate) fn from_parse(key: &PoolKey, conn_id: u64, e: ParseError) -> Self {
        match e {
            ParseError::Io { source } => Self::PeerClosed { key: key.clone(), conn_id, source },
            e if e.is_incomplete() => {
                Self::PeerClosed { key: key.clone(), conn_id, source: io::Error::new(io::ErrorKind::UnexpectedEof, e) }
            }
            e => Self::Protocol { key: key.clone(), conn_id, source: e.into() },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Tls { .. } => ErrorKind::Tls,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::PeerClosed { .. } => ErrorKind::PeerClosed,
            Self::AuthChallenge { .. } => ErrorKind::AuthChallenge,
            Self::Send { .. } => ErrorKind::Send,
            Self::InvalidUri { .. } => ErrorKind::InvalidUri,
            Self::PoolClosed { .. } => ErrorKind::PoolClosed,
            Self::Canceled { .. } => ErrorKind::Canceled,
        }
    }

    pub fn key(&self) -> Option<&PoolKey> {
        match self {
            Self::Resolution { key, .. }
            | Self::Connect { key, .. }
            | Self::Tls { key, .. }
            | Self::Timeout { key, .. }
            | Self::Protocol { key, .. }
            | Self::PeerClosed { key, .. }
            | Self::Send { key, .. }
            | Self::PoolClosed { key }
            | Self::Canceled { key } => Some(key),
            Self::AuthChallenge { .. } | Self::InvalidUri { .. } => None,
        }
    }

    pub fn connection_id(&self) -> Option<u64> {
        match self {
            Self::Protocol { conn_id, .. } | Self::PeerClosed { conn_id, .. } | Self::Send { conn_id, .. } => Some(*conn_id),
            _ => None,
        }
    }

    /// Whether the request may be retried on a fresh connection: the transport
    /// failed before a single request byte left.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Send { bytes_sent: 0, .. })
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsVerification;
    use crate::pool::Scheme;

    fn key() -> PoolKey {
        PoolKey::new(Scheme::Http, "example.com", 80, TlsVerification::Verify)
    }

    #[test]
    fn incomplete_message_is_peer_closed() {
        let error = ClientError::from_parse(&key(), 7, ParseError::incomplete("closed inside body"));
        assert_eq!(error.kind(), ErrorKind::PeerClosed);
        assert_eq!(error.connection_id(), Some(7));
    }

    #[test]
    fn framing_violation_is_protocol() {
        let error = ClientError::from_parse(&key(), 7, ParseError::ConflictingFraming);
        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert_eq!(error.key(), Some(&key()));
    }

    #[test]
    fn only_unsent_requests_retry() {
        let unsent = ClientError::Send { key: key(), conn_id: 1, bytes_sent: 0, source: io::ErrorKind::BrokenPipe.into() };
        let partial = ClientError::Send { key: key(), conn_id: 1, bytes_sent: 12, source: io::ErrorKind::BrokenPipe.into() };
        assert!(unsent.is_retryable());
        assert!(!partial.is_retryable());
        assert!(!ClientError::Timeout { key: key(), timeout: Duration::from_secs(1) }.is_retryable());
    }
}
