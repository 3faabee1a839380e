//! Two-hop forward proxy.
//!
//! Clients authenticate against the dispatcher with a bearer token; the
//! dispatcher claims the least recently used backend instance of the
//! client's project, opens a certificate-pinned mTLS connection to that
//! instance's edge tunnel server, issues a CONNECT and relays bytes. The edge
//! server re-verifies the dispatcher's certificate and makes the final TCP
//! dial to the destination.
//!
//! ```text
//! client ──▶ dispatcher ══mTLS══▶ edge server ──▶ destination
//!            (http, security,     (edge)
//!             load_balancer)
//! ```

// Protocol handlers
pub mod edge;
pub mod http;

// Core subsystems
pub mod config;
pub mod error;
pub mod load_balancer;
pub mod net;
pub mod repository;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::{DispatcherConfig, EdgeConfig};
pub use error::{DispatchError, EdgeError};
pub use http::{Dispatcher, DispatcherServer};
pub use edge::{EdgeHandler, EdgeServer};
pub use lifecycle::Shutdown;
