//! Raw response framing.
//!
//! Responses are written directly to the socket: the dispatcher owns the
//! client connection end to end and the edge server speaks fixed status lines.

use serde::Serialize;

use crate::error::DispatchError;
use crate::http::request::RequestHead;

/// Written to the client once a CONNECT tunnel is ready.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// The only acceptable first line from a backend after CONNECT.
pub const BACKEND_ACK: &str = "HTTP/1.1 200 OK";

/// Edge server: tunnel ready.
pub const EDGE_OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Edge server: peer certificate did not verify.
pub const EDGE_INVALID_CERTIFICATE: &[u8] =
    b"HTTP/1.1 401 connect_error\r\nX-Scrapoxy-Proxyerror: invalid certificate\r\n\r\n\r\n";

/// Edge server: anything but CONNECT.
pub const EDGE_NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\n\r\n";

/// Edge server: destination dial failed.
pub fn edge_dial_error(message: &str) -> Vec<u8> {
    let message: String = message.chars().filter(|c| !c.is_control()).collect();
    format!(
        "HTTP/1.1 500 connect_error\r\nX-Scrapoxy-Proxyerror: {}\r\n\r\n\r\n",
        message
    )
    .into_bytes()
}

/// CONNECT request sent from the dispatcher to a backend instance.
pub fn connect_request(host_port: &str) -> Vec<u8> {
    format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", host_port).into_bytes()
}

/// JSON payload of dispatcher error responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody<'a> {
    pub id: &'a str,
    pub message: String,
    pub method: &'a str,
    pub url: &'a str,
}

fn reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        407 => "Proxy Authentication Required",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Full HTTP response for a dispatcher failure.
///
/// `head` is absent when the request itself could not be parsed.
pub fn error_response(err: &DispatchError, head: Option<&RequestHead>, auth_scheme: &str) -> Vec<u8> {
    let body = ErrorBody {
        id: err.error_id(),
        message: err.to_string(),
        method: head.map(|h| h.method.as_str()).unwrap_or(""),
        url: head.map(|h| h.target.as_str()).unwrap_or(""),
    };
    let body = serde_json::to_vec(&body).unwrap_or_default();

    let status = err.status();
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason(status));
    if err.challenges() {
        out.push_str(&format!("Proxy-Authenticate: {}\r\n", auth_scheme));
    }
    out.push_str("Content-Type: application/json\r\n");
    out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    out.push_str("Connection: close\r\n\r\n");

    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&body);
    bytes
}
