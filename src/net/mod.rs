//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (edge only: mTLS handshake, CA pool)
//!     → connection.rs (lifecycle tracking)
//!     → protocol handler
//!
//! Outgoing backend dial (dispatcher):
//!     pinned.rs (per-instance pinned TLS config) → TLS stream
//!
//! Established tunnel:
//!     relay.rs (two pumps, join on both, then close)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS material is loaded once and shared read-only

pub mod connection;
pub mod listener;
pub mod pinned;
pub mod relay;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use pinned::PinnedConnectors;
pub use relay::{relay, RelayStats};
pub use tls::{CaPool, TlsError};
