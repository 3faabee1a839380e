//! Backend selector.
//!
//! # Responsibilities
//! - Apply the eligibility policy (STARTED, not removing, fingerprinted)
//! - Delegate the atomic claim to the repository
//! - Expose read-only instance aggregates

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::DispatchError;
use crate::repository::{
    BackendInstance, ClaimRequest, Eligibility, InstanceCounts, Project, Repository,
    RepositoryResult,
};

use super::SelectionOrder;

/// Picks the least-recently-used eligible instance for a project.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    repository: Arc<dyn Repository>,
    eligibility: Eligibility,
    order: SelectionOrder,
}

impl BackendSelector {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            eligibility: Eligibility::default(),
            order: SelectionOrder::LeastRecentlyUsed,
        }
    }

    /// Claim an instance for `project`.
    pub async fn select(&self, project: &Project) -> Result<BackendInstance, DispatchError> {
        let request = ClaimRequest {
            project_id: project.id.clone(),
            eligibility: self.eligibility.clone(),
            order: self.order,
            now: unix_now(),
        };

        match self.repository.claim_instance(&request).await {
            Ok(instance) => {
                tracing::debug!(
                    project_id = %project.id,
                    instance_id = %instance.id,
                    request_count = instance.request_count,
                    "Backend instance claimed"
                );
                Ok(instance)
            }
            Err(e) => {
                tracing::warn!(project_id = %project.id, error = %e, "No backend instance claimed");
                Err(DispatchError::NoEligibleBackend(e.to_string()))
            }
        }
    }

    /// Instance counts by status and removing flag.
    pub async fn counts(&self) -> RepositoryResult<InstanceCounts> {
        self.repository.instance_counts().await
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
