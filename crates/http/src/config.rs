//! Server-side tuning knobs.

use std::time::Duration;

use crate::codec::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADERS, HeaderLimits};

/// Bodies strictly smaller than this many bytes are written together with their head.
pub const DEFAULT_COALESCE_THRESHOLD: usize = 2 * 1024;

/// How long an idle keep-alive connection waits for its next request.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(75);

/// Configuration of the server connection loop.
///
/// ```
/// use std::time::Duration;
/// use keepalive_http::ServerConfig;
///
/// let config = ServerConfig::default().keep_alive_timeout(Duration::from_secs(5)).coalesce_threshold(4096);
/// assert_eq!(config.get_coalesce_threshold(), 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    keep_alive_timeout: Duration,
    coalesce_threshold: usize,
    max_header_bytes: usize,
    max_headers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            coalesce_threshold: DEFAULT_COALESCE_THRESHOLD,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

impl ServerConfig {
    pub fn keep_alive_timeout(mut self, keep_alive_timeout: Duration) -> Self {
        self.keep_alive_timeout = keep_alive_timeout;
        self
    }

    pub fn coalesce_threshold(mut self, coalesce_threshold: usize) -> Self {
        self.coalesce_threshold = coalesce_threshold;
        self
    }

    pub fn max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    pub fn max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers;
        self
    }

    pub fn get_keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    pub fn get_coalesce_threshold(&self) -> usize {
        self.coalesce_threshold
    }

    pub fn header_limits(&self) -> HeaderLimits {
        HeaderLimits { max_header_bytes: self.max_header_bytes, max_headers: self.max_headers }
    }
}
