//! Storage abstraction for projects and backend instances.
//!
//! # Data Flow
//! ```text
//! Access authenticator
//!     → project_by_token (read-only lookup)
//!
//! Backend selector
//!     → claim_instance (filter + LRU order + claim, one atomic step)
//!
//! Metrics collector
//!     → instance_counts (read-only aggregates)
//! ```
//!
//! # Design Decisions
//! - Records are created and updated outside this process; the dispatcher
//!   only claims instances and reads aggregates
//! - The claim is a single read-modify-write in the store, which bounds
//!   double dispatch but does not serialize concurrent dispatchers
//! - The store driver is pluggable behind the `Repository` trait

pub mod memory;
pub mod model;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryRepository;
pub use model::{
    BackendInstance, ClaimRequest, Eligibility, InstanceAddress, InstanceCertificate,
    InstanceCounts, InstanceStatus, Project,
};

/// Errors surfaced by a repository implementation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No record matched the query.
    #[error("no matching {0} found")]
    NotFound(&'static str),

    /// The store could not be reached or failed the operation.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// A seed document could not be loaded.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Abstract store for `Project` and `BackendInstance` records.
#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Check the store is reachable. Called once at startup.
    async fn ping(&self) -> RepositoryResult<()>;

    /// Resolve the project owning `token`.
    async fn project_by_token(&self, token: &str) -> RepositoryResult<Project>;

    /// Atomically select the first eligible instance in least-recently-used
    /// order, increment its request count and stamp its last connection time.
    ///
    /// Returns the instance as it is after the claim. When nothing is
    /// eligible the store is left untouched and `NotFound` is returned.
    async fn claim_instance(&self, request: &ClaimRequest) -> RepositoryResult<BackendInstance>;

    /// Aggregate instance counts by status and by removing flag.
    async fn instance_counts(&self) -> RepositoryResult<InstanceCounts>;

    /// Total number of projects.
    async fn project_count(&self) -> RepositoryResult<u64>;

    /// Total number of instances.
    async fn instance_count(&self) -> RepositoryResult<u64>;
}
