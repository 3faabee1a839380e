//! Backend instance selection.
//!
//! # Data Flow
//! ```text
//! Authenticated project
//!     → selector.rs (eligibility policy + claim timestamp)
//!     → Repository::claim_instance (filter, lru.rs order, claim)
//!     → Claimed BackendInstance or NoEligibleBackend
//! ```
//!
//! # Design Decisions
//! - Selection state lives in the store, not in the dispatcher process
//! - Ordering is least-recently-used so traffic spreads across instances
//! - Aggregate counts are exposed read-only for the metrics collector

pub mod lru;
pub mod selector;

pub use lru::SelectionOrder;
pub use selector::BackendSelector;
