//! Minimal HTTP/1.x message surgery: split a raw message into start line, headers and
//! body, edit the header list, and rebuild it byte-for-byte otherwise.

pub const AUTHORIZATION: &str = "Authorization";
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
pub const NEGOTIATE: &str = "Negotiate";
pub const NTLM: &str = "NTLM";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("message has no end-of-headers marker")]
    Unterminated,

    #[error("message has no start line")]
    MissingStartLine,

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
}

/// A parsed HTTP request or response. Header order and duplicates are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, HttpParseError> {
        let (head_len, separator_len) = find_head_end(raw).ok_or(HttpParseError::Unterminated)?;
        let head = String::from_utf8_lossy(&raw[..head_len]);
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let start_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(HttpParseError::MissingStartLine)?
            .to_owned();

        let mut headers = Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(HttpParseError::MalformedHeader(line.to_owned()));
            };
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(Self {
            start_line,
            headers,
            body: raw[head_len + separator_len..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.start_line.len() + self.body.len() + 256);
        out.extend_from_slice(self.start_line.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Status code of a response; `None` for requests or garbled status lines.
    pub fn status_code(&self) -> Option<u16> {
        let mut parts = self.start_line.split_whitespace();
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }

    /// Values of every header called `name`, case-insensitively, in message order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn first_header<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.header_values(name).next()
    }

    /// Token part of the first `WWW-Authenticate` challenge for `scheme`.
    ///
    /// Yields an empty string for a bare challenge such as `WWW-Authenticate: Negotiate`.
    pub fn challenge(&self, scheme: &str) -> Option<&str> {
        self.header_values(WWW_AUTHENTICATE)
            .find_map(|value| strip_scheme(value, scheme))
    }

    /// Whether any `Authorization` header uses `scheme`.
    pub fn has_authorization(&self, scheme: &str) -> bool {
        self.header_values(AUTHORIZATION)
            .any(|value| strip_scheme(value, scheme).is_some())
    }
}

/// Appends `name: value` as the last header of the raw message `raw`.
///
/// Everything else is copied byte-for-byte, including header bytes that are not UTF-8,
/// and the new line uses the message's own line ending.
pub fn append_header(raw: &[u8], name: &str, value: &str) -> Result<Vec<u8>, HttpParseError> {
    let (head_len, separator_len) = find_head_end(raw).ok_or(HttpParseError::Unterminated)?;
    let eol: &[u8] = if separator_len == 4 { b"\r\n" } else { b"\n" };
    let split = head_len + eol.len();

    let mut out = Vec::with_capacity(raw.len() + name.len() + value.len() + 4);
    out.extend_from_slice(&raw[..split]);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(eol);
    out.extend_from_slice(&raw[split..]);
    Ok(out)
}

/// The scheme word of an `Authorization` or `WWW-Authenticate` value.
pub fn auth_scheme(value: &str) -> &str {
    value.split_whitespace().next().unwrap_or("")
}

fn strip_scheme<'v>(value: &'v str, scheme: &str) -> Option<&'v str> {
    let prefix = value.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    Some(value[scheme.len()..].trim())
}

fn find_head_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    raw.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\
Server: test\r\n\
www-authenticate: NTLM\r\n\
WWW-Authenticate: Negotiate\r\n\
WWW-Authenticate: Negotiate oRQwEqADCgEBoQsGCSqGSIKG9xIBAgI=\r\n\
Content-Length: 4\r\n\
\r\n\
nope";

    #[test]
    fn parses_and_rebuilds_preserving_order() {
        let message = HttpMessage::parse(CHALLENGE).unwrap();
        assert_eq!(message.start_line, "HTTP/1.1 401 Unauthorized");
        assert_eq!(message.headers.len(), 5);
        assert_eq!(message.headers[1].0, "www-authenticate");
        assert_eq!(message.body, b"nope");
        assert_eq!(message.to_bytes(), CHALLENGE);
    }

    #[test]
    fn first_negotiate_challenge_wins() {
        let message = HttpMessage::parse(CHALLENGE).unwrap();
        assert_eq!(message.status_code(), Some(401));
        assert_eq!(message.challenge(NEGOTIATE), Some(""));
        assert_eq!(message.challenge(NTLM), Some(""));
        assert_eq!(message.challenge("Basic"), None);
    }

    #[test]
    fn appends_authorization_after_existing_headers() {
        let raw = b"GET /x HTTP/1.1\r\nHost: app\r\n\r\n";
        let request = HttpMessage::parse(raw).unwrap();
        assert_eq!(request.status_code(), None);
        assert!(!request.has_authorization(NEGOTIATE));

        let rewritten = append_header(raw, AUTHORIZATION, "Negotiate YWJj").unwrap();
        assert!(HttpMessage::parse(&rewritten).unwrap().has_authorization("negotiate"));
        assert_eq!(
            rewritten,
            b"GET /x HTTP/1.1\r\nHost: app\r\nAuthorization: Negotiate YWJj\r\n\r\n"
        );
    }

    #[test]
    fn appended_header_keeps_other_bytes_intact() {
        let raw = b"GET /x HTTP/1.1\r\nHost: app\r\nX-Name: caf\xE9\r\n\r\nbody";
        let out = append_header(raw, AUTHORIZATION, "Negotiate YWJj").unwrap();
        assert_eq!(
            out,
            b"GET /x HTTP/1.1\r\nHost: app\r\nX-Name: caf\xE9\r\nAuthorization: Negotiate YWJj\r\n\r\nbody"
        );

        let bare = append_header(b"GET / HTTP/1.0\n\n", "A", "b").unwrap();
        assert_eq!(bare, b"GET / HTTP/1.0\nA: b\n\n");

        assert_eq!(
            append_header(b"GET / HTTP/1.1\r\n", "A", "b"),
            Err(HttpParseError::Unterminated)
        );
    }

    #[test]
    fn rejects_truncated_messages() {
        assert_eq!(
            HttpMessage::parse(b"GET / HTTP/1.1\r\nHost: a"),
            Err(HttpParseError::Unterminated)
        );
        assert!(matches!(
            HttpMessage::parse(b"GET / HTTP/1.1\r\nbogus\r\n\r\n"),
            Err(HttpParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn scheme_of_authorization_value() {
        assert_eq!(auth_scheme("Basic Zm9vOmJhcg=="), "Basic");
        assert_eq!(auth_scheme(""), "");
    }
}
