//! Client authentication.
//!
//! # Data Flow
//! ```text
//! Proxy-Authorization: <scheme> <token>
//!     → access.rs (shape and scheme checks)
//!     → Repository::project_by_token
//!     → Project, or a 407 error
//! ```
//!
//! # Design Decisions
//! - Fail closed: any malformed header is rejected before the repository is hit
//! - Only the challenge for a missing or malformed header carries
//!   `Proxy-Authenticate`

pub mod access;

pub use access::Authenticator;
