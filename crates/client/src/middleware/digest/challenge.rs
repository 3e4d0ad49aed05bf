//! `WWW-Authenticate: Digest` challenges (RFC 7616 §3.3).

use std::collections::HashMap;
use std::fmt;

use http::HeaderMap;
use http::header::WWW_AUTHENTICATE;
use md5::Md5;
use sha2::{Digest, Sha256, Sha512_256};

/// The hash a challenge asks for; `-sess` variants fold the client nonce into `HA1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
    Sha512_256,
    Sha512_256Sess,
}

impl Algorithm {
    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [Algorithm; 6] = [
            Algorithm::Md5,
            Algorithm::Md5Sess,
            Algorithm::Sha256,
            Algorithm::Sha256Sess,
            Algorithm::Sha512_256,
            Algorithm::Sha512_256Sess,
        ];
        ALL.into_iter().find(|algorithm| algorithm.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
            Self::Sha512_256 => "SHA-512-256",
            Self::Sha512_256Sess => "SHA-512-256-sess",
        }
    }

    pub fn is_sess(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess | Self::Sha512_256Sess)
    }

    /// Lowercase hex digest of `data`.
    pub(crate) fn hash(self, data: &[u8]) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex_digest::<Md5>(data),
            Self::Sha256 | Self::Sha256Sess => hex_digest::<Sha256>(data),
            Self::Sha512_256 | Self::Sha512_256Sess => hex_digest::<Sha512_256>(data),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn hex_digest<D: Digest>(data: &[u8]) -> String {
    D::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

/// Quality of protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    /// Also covers a hash of the request body.
    AuthInt,
}

impl Qop {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("auth") => Some(Self::Auth),
            s if s.eq_ignore_ascii_case("auth-int") => Some(Self::AuthInt),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
        }
    }
}

/// A parsed digest challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Algorithm,
    /// Empty for a challenge without `qop`, answered the RFC 2069 way.
    qop: Vec<Qop>,
    stale: bool,
}

impl Challenge {
    /// Parses one header value of the form `Digest realm="...", nonce="..."`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim_start();
        let Some(params) = strip_scheme(value) else {
            return Err("not a Digest challenge".to_string());
        };

        let mut params = parse_kv_list(params).map_err(str::to_string)?;
        let realm = params.remove("realm").ok_or("challenge without realm")?;
        let nonce = params.remove("nonce").ok_or("challenge without nonce")?;

        let algorithm = match params.remove("algorithm") {
            Some(name) => Algorithm::parse(&name).ok_or_else(|| format!("unsupported algorithm {name}"))?,
            None => Algorithm::Md5,
        };

        let qop = match params.remove("qop") {
            Some(list) => {
                let qop: Vec<Qop> = list.split(',').filter_map(Qop::parse).collect();
                if qop.is_empty() {
                    return Err(format!("unsupported qop {list}"));
                }
                qop
            }
            None => Vec::new(),
        };

        let stale = params.remove("stale").is_some_and(|stale| stale.eq_ignore_ascii_case("true"));

        Ok(Self { realm, nonce, opaque: params.remove("opaque"), algorithm, qop, stale })
    }

    /// Finds the first digest challenge among the `WWW-Authenticate` headers.
    ///
    /// `None` when no header offers the Digest scheme.
    pub fn from_headers(headers: &HeaderMap) -> Option<Result<Self, String>> {
        let mut values = headers.get_all(WWW_AUTHENTICATE).iter();
        let value = values.find(|value| value.to_str().is_ok_and(|value| strip_scheme(value.trim_start()).is_some()))?;
        Some(value.to_str().map_err(|e| e.to_string()).and_then(Self::parse))
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn opaque(&self) -> Option<&str> {
        self.opaque.as_deref()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn qop(&self) -> &[Qop] {
        &self.qop
    }

    /// Whether the server rejected an outdated nonce rather than the credentials.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Picks `auth-int` when offered and the body is at hand, `auth` otherwise.
    ///
    /// `Ok(None)` means the challenge carries no `qop` at all.
    pub(crate) fn choose_qop(&self, body_available: bool) -> Result<Option<Qop>, &'static str> {
        if self.qop.is_empty() {
            return Ok(None);
        }
        if body_available && self.qop.contains(&Qop::AuthInt) {
            return Ok(Some(Qop::AuthInt));
        }
        if self.qop.contains(&Qop::Auth) {
            return Ok(Some(Qop::Auth));
        }
        Err("auth-int needs a replayable request body")
    }
}

fn strip_scheme(value: &str) -> Option<&str> {
    let (scheme, rest) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
    scheme.eq_ignore_ascii_case("digest").then_some(rest)
}

/// Parses a comma separated `name=value` list; values may be quoted strings with `\` escapes.
fn parse_kv_list(input: &str) -> Result<HashMap<String, String>, &'static str> {
    let mut out = HashMap::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let key_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b'_') {
            i += 1;
        }
        if i == key_start {
            return Err("expected parameter name");
        }
        let key = input[key_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            return Err("expected '=' after parameter name");
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return Err("expected parameter value");
        }

        let value = if bytes[i] == b'"' {
            i += 1;
            let mut value = Vec::new();
            loop {
                match bytes.get(i) {
                    None => return Err("unterminated quoted string"),
                    Some(b'\\') => {
                        let escaped = *bytes.get(i + 1).ok_or("invalid escape in quoted string")?;
                        value.push(escaped);
                        i += 2;
                    }
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(b) => {
                        value.push(*b);
                        i += 1;
                    }
                }
            }
            String::from_utf8(value).map_err(|_utf8| "quoted string is not UTF-8")?
        } else {
            let value_start = i;
            while i < bytes.len() && bytes[i] != b',' {
                i += 1;
            }
            input[value_start..i].trim().to_string()
        };

        out.insert(key, value);
    }

    Ok(out)
}
