//! Dispatcher HTTP/1.1 proxy protocol.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, per-connection task)
//!     → request.rs (raw head, target resolution)
//!     → handler.rs (auth → select → dial → CONNECT → relay)
//!     → response.rs (status lines, JSON error payloads)
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{Dispatcher, TunnelState};
pub use request::{RequestHead, TunnelTarget};
pub use server::DispatcherServer;
