//! Proxy-Authorization checks.
//!
//! The header must be `<scheme> <token>`: exactly two whitespace-separated,
//! non-empty parts with the scheme matching the configured one. The token is
//! then resolved to a `Project` through the repository.

use std::sync::Arc;

use crate::error::DispatchError;
use crate::repository::{Project, Repository};

/// Header carrying the client's credentials.
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";

const NO_TOKEN: &str = "No token found";

/// Resolves the caller's project from its bearer token.
#[derive(Debug, Clone)]
pub struct Authenticator {
    repository: Arc<dyn Repository>,
    scheme: String,
}

impl Authenticator {
    pub fn new(repository: Arc<dyn Repository>, scheme: impl Into<String>) -> Self {
        Self {
            repository,
            scheme: scheme.into(),
        }
    }

    /// Scheme advertised in `Proxy-Authenticate` challenges.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Extract the token from a raw header value.
    pub fn token<'a>(&self, header: Option<&'a str>) -> Result<&'a str, DispatchError> {
        let header = header.ok_or_else(|| DispatchError::Authentication(NO_TOKEN.into()))?;

        let mut parts = header.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case(&self.scheme) => Ok(token),
            _ => Err(DispatchError::Authentication(NO_TOKEN.into())),
        }
    }

    /// Validate the header and resolve its project.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Project, DispatchError> {
        let token = self.token(header)?;

        self.repository.project_by_token(token).await.map_err(|e| {
            tracing::warn!(error = %e, "Could not get project");
            DispatchError::AuthorizationLookup(e)
        })
    }
}
