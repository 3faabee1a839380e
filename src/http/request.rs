//! Request head parsing and forwarding.
//!
//! # Responsibilities
//! - Read a raw request head up to the blank line, with a size limit
//! - Parse the request line and headers
//! - Resolve the tunnel target (host, port, scheme)
//! - Re-serialize a plain HTTP request without hop-by-hop headers
//!
//! # Design Decisions
//! - Bytes after the head stay buffered in the reader and are relayed as-is
//! - Only the request line and the headers the proxy needs are interpreted

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use thiserror::Error;
use url::Url;

/// Headers removed before a plain HTTP request is forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Accept-Encoding",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Connection",
];

/// Failure to obtain a request head.
#[derive(Debug, Error)]
pub enum HeadError {
    /// Peer closed before sending anything.
    #[error("connection closed before request")]
    Closed,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read raw bytes up to and including the blank line ending a request head.
///
/// Anything the peer sent after the head remains in `reader`'s buffer.
pub async fn read_head<R>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let start = head.len();
        let remaining = (max_bytes + 1 - start) as u64;
        let n = (&mut *reader).take(remaining).read_until(b'\n', &mut head).await?;
        if n == 0 {
            if head.is_empty() {
                return Err(HeadError::Closed);
            }
            return Err(HeadError::Malformed("unexpected end of stream".into()));
        }
        if head.len() > max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            // Tolerate blank lines before the request line.
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

/// A parsed HTTP/1.x request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the request line and headers from raw head bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| HeadError::Malformed("request head is not valid UTF-8".into()))?;
        let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| HeadError::Malformed("missing request line".into()))?;

        let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/1.") => (m, t, v),
            _ => {
                return Err(HeadError::Malformed(format!(
                    "invalid request line: {}",
                    request_line
                )))
            }
        };
        if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(HeadError::Malformed(format!("invalid method: {}", method)));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HeadError::Malformed(format!("invalid header line: {}", line)))?;
            let name = name.trim();
            if name.is_empty() || name.contains(' ') {
                return Err(HeadError::Malformed(format!("invalid header name: {}", name)));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Resolve where this request wants to go.
    pub fn tunnel_target(&self) -> Result<TunnelTarget, HeadError> {
        if self.is_connect() {
            let (host, port) = split_host_port(&self.target)?;
            return Ok(TunnelTarget::new(None, host, port, None));
        }

        if self.target.contains("://") {
            let url = Url::parse(&self.target)
                .map_err(|e| HeadError::Malformed(format!("invalid target {}: {}", self.target, e)))?;
            let host = url
                .host_str()
                .ok_or_else(|| HeadError::Malformed(format!("target has no host: {}", self.target)))?
                .to_string();
            let mut origin = url.path().to_string();
            if let Some(query) = url.query() {
                origin.push('?');
                origin.push_str(query);
            }
            return Ok(TunnelTarget::new(
                Some(url.scheme().to_ascii_lowercase()),
                host,
                url.port(),
                Some(origin),
            ));
        }

        let host_header = self
            .header("Host")
            .ok_or_else(|| HeadError::Malformed("missing Host header".into()))?;
        let (host, port) = split_host_port(host_header)?;
        Ok(TunnelTarget::new(None, host, port, Some(self.target.clone())))
    }

    /// Serialize for the backend: origin-form request line, hop-by-hop
    /// headers removed, `Host` first.
    pub fn to_forwarded(&self, target: &TunnelTarget) -> Vec<u8> {
        let origin = target.origin.as_deref().unwrap_or("/");
        let host = self
            .header("Host")
            .map(str::to_string)
            .unwrap_or_else(|| target.authority());

        let mut out = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, origin, host);
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("Host") || is_hop_by_hop(name) {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Destination of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    /// Scheme of an absolute-form target, lowercased.
    pub scheme: Option<String>,
    pub host: String,
    /// Port given explicitly by the client, if any.
    pub explicit_port: Option<u16>,
    /// Path and query for plain HTTP forwarding.
    pub origin: Option<String>,
}

impl TunnelTarget {
    fn new(scheme: Option<String>, host: String, explicit_port: Option<u16>, origin: Option<String>) -> Self {
        Self { scheme, host, explicit_port, origin }
    }

    /// Port to connect to: explicit, else 80 for http and 443 otherwise.
    pub fn port(&self) -> u16 {
        match (self.explicit_port, self.scheme.as_deref()) {
            (Some(port), _) => port,
            (None, Some("http")) => 80,
            (None, _) => 443,
        }
    }

    /// `host:port` with the port always present.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    /// `host[:port]` as the client wrote it.
    pub fn authority(&self) -> String {
        match self.explicit_port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Targets reached through an opaque tunnel: https scheme or port 443.
    pub fn is_https(&self) -> bool {
        self.scheme.as_deref() == Some("https") || self.port() == 443
    }
}

/// Split `host[:port]`, honouring bracketed IPv6 literals.
pub fn split_host_port(authority: &str) -> Result<(String, Option<u16>), HeadError> {
    let invalid = || HeadError::Malformed(format!("invalid authority: {}", authority));

    if authority.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (ip, after) = rest.split_once(']').ok_or_else(invalid)?;
        let host = format!("[{}]", ip);
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, Some(port.parse().map_err(|_| invalid())?))),
            None if after.is_empty() => Ok((host, None)),
            None => Err(invalid()),
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            Ok((host.to_string(), Some(port.parse().map_err(|_| invalid())?)))
        }
        Some(_) => Err(invalid()),
        None => Ok((authority.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn read_head_stops_at_blank_line() {
        let raw: &[u8] = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nEXTRA";
        let mut reader = BufReader::new(raw);
        let head = read_head(&mut reader, 8192).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"EXTRA");
    }

    #[tokio::test]
    async fn read_head_enforces_limit() {
        let raw = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(4096));
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(read_head(&mut reader, 1024).await, Err(HeadError::TooLarge(1024))));
    }

    #[tokio::test]
    async fn read_head_reports_closed_and_truncated() {
        let mut empty = BufReader::new(&b""[..]);
        assert!(matches!(read_head(&mut empty, 1024).await, Err(HeadError::Closed)));

        let mut truncated = BufReader::new(&b"GET / HTTP/1.1\r\nHost: a"[..]);
        assert!(matches!(read_head(&mut truncated, 1024).await, Err(HeadError::Malformed(_))));
    }

    #[test]
    fn parses_connect_head() {
        let head = RequestHead::parse(
            b"CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com:8443\r\nProxy-Authorization: Basic abc\r\n\r\n",
        )
        .unwrap();
        assert!(head.is_connect());
        assert_eq!(head.header("proxy-authorization"), Some("Basic abc"));

        let target = head.tunnel_target().unwrap();
        assert_eq!(target.host_port(), "example.com:8443");
        assert!(!target.is_https());
    }

    #[test]
    fn connect_without_port_defaults_to_443() {
        let head = RequestHead::parse(b"CONNECT example.com HTTP/1.1\r\n\r\n").unwrap();
        let target = head.tunnel_target().unwrap();
        assert_eq!(target.host_port(), "example.com:443");
        assert!(target.is_https());
    }

    #[test]
    fn absolute_http_target_defaults_to_80() {
        let head = RequestHead::parse(
            b"GET http://example.com/path?q=1 HTTP/1.1\r\nHost: example.com\r\n\r\n",
        )
        .unwrap();
        let target = head.tunnel_target().unwrap();
        assert_eq!(target.host_port(), "example.com:80");
        assert_eq!(target.origin.as_deref(), Some("/path?q=1"));
        assert!(!target.is_https());
    }

    #[test]
    fn https_scheme_or_port_443_is_tunnelled() {
        let https = RequestHead::parse(b"GET https://example.com/ HTTP/1.1\r\n\r\n").unwrap();
        assert!(https.tunnel_target().unwrap().is_https());

        let port = RequestHead::parse(b"GET http://example.com:443/ HTTP/1.1\r\n\r\n").unwrap();
        assert!(port.tunnel_target().unwrap().is_https());
    }

    #[test]
    fn rejects_malformed_heads() {
        assert!(RequestHead::parse(b"\r\n").is_err());
        assert!(RequestHead::parse(b"GET /\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / SPDY/3\r\n\r\n").is_err());
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n").is_err());
    }

    #[test]
    fn forwarded_request_strips_hop_by_hop_headers() {
        let head = RequestHead::parse(
            b"POST http://example.com/submit HTTP/1.1\r\n\
              Host: example.com\r\n\
              Proxy-Authorization: Basic abc\r\n\
              Proxy-Connection: keep-alive\r\n\
              Connection: close\r\n\
              Accept-Encoding: gzip\r\n\
              Content-Length: 4\r\n\
              X-Custom: yes\r\n\r\n",
        )
        .unwrap();
        let target = head.tunnel_target().unwrap();
        let forwarded = String::from_utf8(head.to_forwarded(&target)).unwrap();

        assert_eq!(
            forwarded,
            "POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 4\r\nX-Custom: yes\r\n\r\n"
        );
    }

    #[test]
    fn splits_authorities() {
        assert_eq!(split_host_port("a.com:80").unwrap(), ("a.com".into(), Some(80)));
        assert_eq!(split_host_port("a.com").unwrap(), ("a.com".into(), None));
        assert_eq!(split_host_port("[::1]:8080").unwrap(), ("[::1]".into(), Some(8080)));
        assert_eq!(split_host_port("[::1]").unwrap(), ("[::1]".into(), None));
        assert!(split_host_port("a.com:http").is_err());
        assert!(split_host_port("").is_err());
        assert!(split_host_port("::1").is_err());
    }
}
