//! Per-connection error taxonomy.
//!
//! Every error here is local to one client connection: it is converted to a
//! status line plus payload, counted, and the connection is closed. None of
//! them stop a listener.

use thiserror::Error;

use crate::repository::RepositoryError;

/// Failures of the dispatcher state machine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Proxy-Authorization header missing or malformed.
    #[error("{0}")]
    Authentication(String),

    /// Token did not resolve to a project.
    #[error("{0}")]
    AuthorizationLookup(#[source] RepositoryError),

    /// The project has no instance that can take the request.
    #[error("{0}")]
    NoEligibleBackend(String),

    /// Pinned TLS dial to the instance failed.
    #[error("{0}")]
    BackendDial(String),

    /// The instance answered the CONNECT with something other than 200.
    #[error("{0}")]
    ProtocolViolation(String),

    /// Raw control of the client socket could not be taken.
    #[error("webserver doesn't support hijacking")]
    HijackUnsupported,

    /// The client request head could not be parsed.
    #[error("{0}")]
    MalformedRequest(String),
}

impl DispatchError {
    /// HTTP status returned to the client.
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::Authentication(_)
            | DispatchError::AuthorizationLookup(_)
            | DispatchError::NoEligibleBackend(_) => 407,
            DispatchError::MalformedRequest(_) => 400,
            DispatchError::BackendDial(_)
            | DispatchError::ProtocolViolation(_)
            | DispatchError::HijackUnsupported => 500,
        }
    }

    /// Stable identifier placed in the JSON error body.
    pub fn error_id(&self) -> &'static str {
        match self {
            DispatchError::Authentication(_) | DispatchError::NoEligibleBackend(_) => "no_proxy",
            DispatchError::AuthorizationLookup(_) => "no_project",
            DispatchError::BackendDial(_) => "backend_unreachable",
            DispatchError::ProtocolViolation(_) => "proxy_error",
            DispatchError::HijackUnsupported => "internal",
            DispatchError::MalformedRequest(_) => "bad_request",
        }
    }

    /// Whether the response carries a `Proxy-Authenticate` challenge.
    pub fn challenges(&self) -> bool {
        matches!(self, DispatchError::Authentication(_))
    }
}

/// Failures of the edge tunnel server.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("invalid certificate")]
    CertificateVerification(String),

    #[error("{0}")]
    Dial(String),

    #[error("method {0} not allowed")]
    UnsupportedMethod(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_407() {
        let errors = [
            DispatchError::Authentication("No token found".into()),
            DispatchError::AuthorizationLookup(RepositoryError::NotFound("project")),
            DispatchError::NoEligibleBackend("none".into()),
        ];
        for err in &errors {
            assert_eq!(err.status(), 407);
        }
        assert_eq!(errors[0].error_id(), "no_proxy");
        assert_eq!(errors[1].error_id(), "no_project");
        assert_eq!(errors[2].error_id(), "no_proxy");
        assert!(errors[0].challenges());
        assert!(!errors[1].challenges());
    }

    #[test]
    fn backend_failures_are_500() {
        assert_eq!(DispatchError::BackendDial("refused".into()).status(), 500);
        assert_eq!(DispatchError::ProtocolViolation("HTTP/1.1 502".into()).status(), 500);
        assert_eq!(DispatchError::HijackUnsupported.status(), 500);
        assert_eq!(DispatchError::ProtocolViolation("x".into()).error_id(), "proxy_error");
    }

    #[test]
    fn certificate_error_message_is_fixed() {
        let err = EdgeError::CertificateVerification("UnknownIssuer".into());
        assert_eq!(err.to_string(), "invalid certificate");
    }
}
