//! Persistent record types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::SelectionOrder;

/// Authentication principal, looked up by token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub token: String,
}

/// Lifecycle status of a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Started => "STARTED",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network address of an edge tunnel server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstanceAddress {
    pub hostname: String,
    pub port: u16,
}

/// PEM certificate and key pinned to an instance.
///
/// The certificate is both the dispatcher's client identity and the only
/// certificate trusted when dialing the instance.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstanceCertificate {
    pub cert: String,
    pub key: String,
}

impl std::fmt::Debug for InstanceCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCertificate")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A proxy egress node the dispatcher routes traffic through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendInstance {
    pub id: String,
    pub project_id: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub removing: bool,
    pub address: InstanceAddress,
    pub certificate: InstanceCertificate,
    #[serde(default)]
    pub fingerprint_present: bool,
    #[serde(default)]
    pub request_count: i64,
    #[serde(default)]
    pub last_connection_ts: i64,
}

/// Eligibility filter applied to instances during selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub status: InstanceStatus,
    pub removing: bool,
    pub fingerprint_required: bool,
}

impl Default for Eligibility {
    fn default() -> Self {
        Self {
            status: InstanceStatus::Started,
            removing: false,
            fingerprint_required: true,
        }
    }
}

impl Eligibility {
    /// Whether `instance` passes the filter for `project_id`.
    pub fn admits(&self, project_id: &str, instance: &BackendInstance) -> bool {
        instance.project_id == project_id
            && instance.status == self.status
            && instance.removing == self.removing
            && (!self.fingerprint_required || instance.fingerprint_present)
    }
}

/// A single atomic selection request handed to the store.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub project_id: String,
    pub eligibility: Eligibility,
    pub order: SelectionOrder,
    /// Unix timestamp (seconds) written as the instance's last connection time.
    pub now: i64,
}

/// Aggregate instance counts for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceCounts {
    pub by_status: BTreeMap<String, u64>,
    pub by_removing: BTreeMap<String, u64>,
}

impl InstanceCounts {
    pub fn record(&mut self, status: InstanceStatus, removing: bool) {
        *self.by_status.entry(status.as_str().to_string()).or_default() += 1;
        *self.by_removing.entry(removing.to_string()).or_default() += 1;
    }

    pub fn total(&self) -> u64 {
        self.by_removing.values().sum()
    }
}
