use std::fmt;

use http::Uri;

use crate::config::TlsVerification;
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Identity of a set of interchangeable connections.
///
/// Two requests may share a connection only if their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    scheme: Scheme,
    host: String,
    port: u16,
    tls_verification: TlsVerification,
}

impl PoolKey {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16, tls_verification: TlsVerification) -> Self {
        let mut host = host.into();
        host.make_ascii_lowercase();
        Self { scheme, host, port, tls_verification }
    }

    /// Derives the key of an absolute `http` or `https` URI.
    pub fn from_uri(uri: &Uri, tls_verification: TlsVerification) -> Result<Self, ClientError> {
        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => Scheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => Scheme::Https,
            Some(_) => return Err(ClientError::invalid_uri(uri, "unsupported scheme")),
            None => return Err(ClientError::invalid_uri(uri, "missing scheme")),
        };

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']'),
            _ => return Err(ClientError::invalid_uri(uri, "missing host")),
        };

        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Self::new(scheme, host, port, tls_verification))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or IP literal, IPv6 literals without brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    pub fn tls_verification(&self) -> TlsVerification {
        self.tls_verification
    }

    /// The `Host` header value: the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') { format!("[{}]", self.host) } else { self.host.clone() };
        if self.port == self.scheme.default_port() { host } else { format!("{host}:{}", self.port) }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uri: &str) -> PoolKey {
        PoolKey::from_uri(&uri.parse().unwrap(), TlsVerification::Verify).unwrap()
    }

    #[test]
    fn default_ports() {
        assert_eq!(key("http://example.com/a").port(), 80);
        assert_eq!(key("https://example.com/a").port(), 443);
        assert_eq!(key("http://example.com:8080/a").port(), 8080);
    }

    #[test]
    fn host_is_case_insensitive() {
        assert_eq!(key("http://Example.COM/"), key("http://example.com/other"));
    }

    #[test]
    fn tls_mode_partitions_keys() {
        let uri = "https://example.com/".parse().unwrap();
        let verified = PoolKey::from_uri(&uri, TlsVerification::Verify).unwrap();
        let unverified = PoolKey::from_uri(&uri, TlsVerification::AcceptInvalidCerts).unwrap();
        assert_ne!(verified, unverified);
    }

    #[test]
    fn ipv6_literal() {
        let key = key("http://[::1]:8080/");
        assert_eq!(key.host(), "::1");
        assert_eq!(key.host_header(), "[::1]:8080");
        assert_eq!(key.to_string(), "http://[::1]:8080");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(key("http://example.com:80/").host_header(), "example.com");
        assert_eq!(key("http://example.com:81/").host_header(), "example.com:81");
    }

    #[test]
    fn rejects_relative_and_foreign_uris() {
        let relative = "/only/path".parse().unwrap();
        assert!(PoolKey::from_uri(&relative, TlsVerification::Verify).is_err());

        let ftp = "ftp://example.com/".parse().unwrap();
        assert!(PoolKey::from_uri(&ftp, TlsVerification::Verify).is_err());
    }
}
