//! In-process repository.
//!
//! Projects are indexed by token in a `DashMap`. Instances live behind a single
//! mutex so that filtering, ordering and claiming happen in one critical
//! section, the in-memory equivalent of a find-and-modify.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use super::{
    BackendInstance, ClaimRequest, InstanceCounts, Project, Repository, RepositoryError,
    RepositoryResult,
};

/// Seed document layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Seed {
    projects: Vec<Project>,
    instances: Vec<BackendInstance>,
}

/// Repository backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    projects: DashMap<String, Project>,
    instances: Mutex<Vec<BackendInstance>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository from a TOML seed string.
    pub fn from_seed_str(content: &str) -> RepositoryResult<Self> {
        let seed: Seed =
            toml::from_str(content).map_err(|e| RepositoryError::InvalidSeed(e.to_string()))?;
        let repo = Self::new();
        for project in seed.projects {
            repo.insert_project(project);
        }
        for instance in seed.instances {
            repo.upsert_instance(instance)?;
        }
        Ok(repo)
    }

    /// Build a repository from a TOML seed file.
    pub fn from_seed_file(path: &Path) -> RepositoryResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::InvalidSeed(format!("{}: {}", path.display(), e)))?;
        let repo = Self::from_seed_str(&content)?;
        tracing::info!(
            path = %path.display(),
            projects = repo.projects.len(),
            "Repository seeded"
        );
        Ok(repo)
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.token.clone(), project);
    }

    /// Insert an instance or replace the one with the same id.
    pub fn upsert_instance(&self, instance: BackendInstance) -> RepositoryResult<()> {
        let mut instances = self.lock_instances()?;
        match instances.iter_mut().find(|i| i.id == instance.id) {
            Some(existing) => *existing = instance,
            None => instances.push(instance),
        }
        Ok(())
    }

    /// Snapshot of a single instance.
    pub fn instance(&self, id: &str) -> Option<BackendInstance> {
        self.lock_instances()
            .ok()
            .and_then(|instances| instances.iter().find(|i| i.id == id).cloned())
    }

    /// Snapshot of every instance.
    pub fn instances(&self) -> Vec<BackendInstance> {
        self.lock_instances()
            .map(|instances| instances.clone())
            .unwrap_or_default()
    }

    fn lock_instances(&self) -> RepositoryResult<MutexGuard<'_, Vec<BackendInstance>>> {
        self.instances
            .lock()
            .map_err(|_| RepositoryError::Unavailable("instance store lock poisoned".into()))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        self.lock_instances().map(|_| ())
    }

    async fn project_by_token(&self, token: &str) -> RepositoryResult<Project> {
        self.projects
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound("project"))
    }

    async fn claim_instance(&self, request: &ClaimRequest) -> RepositoryResult<BackendInstance> {
        let mut instances = self.lock_instances()?;

        let winner = request
            .order
            .first(
                instances
                    .iter()
                    .filter(|i| request.eligibility.admits(&request.project_id, i)),
            )
            .map(|i| i.id.clone())
            .ok_or(RepositoryError::NotFound("backend instance"))?;

        let instance = instances
            .iter_mut()
            .find(|i| i.id == winner)
            .ok_or(RepositoryError::NotFound("backend instance"))?;
        instance.request_count += 1;
        instance.last_connection_ts = request.now;

        Ok(instance.clone())
    }

    async fn instance_counts(&self) -> RepositoryResult<InstanceCounts> {
        let instances = self.lock_instances()?;
        let mut counts = InstanceCounts::default();
        for instance in instances.iter() {
            counts.record(instance.status, instance.removing);
        }
        Ok(counts)
    }

    async fn project_count(&self) -> RepositoryResult<u64> {
        Ok(self.projects.len() as u64)
    }

    async fn instance_count(&self) -> RepositoryResult<u64> {
        Ok(self.lock_instances()?.len() as u64)
    }
}
