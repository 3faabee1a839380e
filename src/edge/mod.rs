//! Edge tunnel server.
//!
//! # Data Flow
//! ```text
//! dispatcher (mTLS, pinned client certificate)
//!     → server.rs (accept, TLS handshake with deadline)
//!     → handler.rs (head, CONNECT only, CA re-verification)
//!     → TCP dial to destination
//!     → relay
//! ```
//!
//! # Design Decisions
//! - The CA pool is loaded once at startup and shared read-only
//! - Failures are answered with fixed status lines and the connection closed

pub mod handler;
pub mod server;

pub use handler::EdgeHandler;
pub use server::EdgeServer;
