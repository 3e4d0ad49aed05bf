//! Connection persistence rules.
//!
//! Whether a transport may carry another exchange depends on the protocol
//! version, the `Connection` tokens of the message, upgrades and on whether
//! the body was fully consumed. All of it is decided here, in one place, so
//! the server loop and the client pool agree.

use http::header::{CONNECTION, UPGRADE};
use http::{HeaderMap, StatusCode, Version};

/// Decides whether the connection that carried a message may be reused.
///
/// * `status` is `None` for requests and `Some` for responses.
/// * `unread_body_remaining` is true if any byte of the body was left on the wire.
///
/// HTTP/1.1 persists unless a `Connection: close` token is present; HTTP/1.0
/// persists only with an explicit `keep-alive` token. Upgrades and `101`
/// responses hand the transport to another protocol and never persist.
pub fn is_reusable(status: Option<StatusCode>, headers: &HeaderMap, version: Version, unread_body_remaining: bool) -> bool {
    if unread_body_remaining {
        return false;
    }

    if status == Some(StatusCode::SWITCHING_PROTOCOLS) || is_upgrade(headers) {
        return false;
    }

    if has_connection_token(headers, "close") {
        return false;
    }

    match version {
        Version::HTTP_11 => true,
        Version::HTTP_10 => has_connection_token(headers, "keep-alive"),
        _ => false,
    }
}

/// Returns true if the message explicitly asks to close the connection after it.
pub fn wants_close(headers: &HeaderMap) -> bool {
    has_connection_token(headers, "close")
}

/// Returns true if the message asks to switch protocols on this transport.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE) && has_connection_token(headers, "upgrade")
}

/// Looks for `token` in every `Connection` header, comparing case-insensitively.
pub fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .flat_map(|value| value.as_bytes().split(|b| *b == b','))
        .any(|candidate| candidate.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn http11_defaults_to_persistent() {
        assert!(is_reusable(Some(StatusCode::OK), &HeaderMap::new(), Version::HTTP_11, false));
        assert!(is_reusable(None, &HeaderMap::new(), Version::HTTP_11, false));
    }

    #[test]
    fn http11_close_token() {
        let map = headers(&[("connection", "close")]);
        assert!(!is_reusable(Some(StatusCode::OK), &map, Version::HTTP_11, false));

        let map = headers(&[("connection", "Keep-Alive, CLOSE")]);
        assert!(!is_reusable(Some(StatusCode::OK), &map, Version::HTTP_11, false));
    }

    #[test]
    fn http10_needs_keep_alive_token() {
        assert!(!is_reusable(Some(StatusCode::OK), &HeaderMap::new(), Version::HTTP_10, false));

        let map = headers(&[("connection", "keep-alive")]);
        assert!(is_reusable(Some(StatusCode::OK), &map, Version::HTTP_10, false));

        let map = headers(&[("connection", "keep-alive"), ("connection", "close")]);
        assert!(!is_reusable(Some(StatusCode::OK), &map, Version::HTTP_10, false));
    }

    #[test]
    fn unread_body_prevents_reuse() {
        assert!(!is_reusable(Some(StatusCode::OK), &HeaderMap::new(), Version::HTTP_11, true));
    }

    #[test]
    fn upgrades_never_persist() {
        assert!(!is_reusable(Some(StatusCode::SWITCHING_PROTOCOLS), &HeaderMap::new(), Version::HTTP_11, false));

        let map = headers(&[("connection", "upgrade"), ("upgrade", "websocket")]);
        assert!(!is_reusable(None, &map, Version::HTTP_11, false));

        // an Upgrade header without the connection token is only an offer
        let map = headers(&[("upgrade", "h2c")]);
        assert!(is_reusable(Some(StatusCode::OK), &map, Version::HTTP_11, false));
    }

    #[test]
    fn unsupported_versions_never_persist() {
        assert!(!is_reusable(Some(StatusCode::OK), &HeaderMap::new(), Version::HTTP_09, false));
    }
}
