// Fault Injectors
//
// One injector per target subsystem. Each knows how to identify the current
// holder of a role (never a fixed name, since identities rotate) and how to
// destroy it. Identity is transient: a TargetIdentity captured before
// injection is only ever used as the *pre-fault* reference; post-injection
// state is validated by re-resolving the role, never by reusing the captured
// name.

pub mod cache;
pub mod database;
pub mod network;
pub mod node;
pub mod replicas;

pub use cache::CachePrimaryFault;
pub use database::DatabasePrimaryFault;
pub use network::NetworkPartitionFault;
pub use node::NodeDrainFault;
pub use replicas::ReplicaPoolFault;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cluster::ClusterError;
use crate::error::HarnessError;

/// Cluster errors during target identification are precondition failures
/// (SKIPPED), except an unreachable control plane, which is fatal.
pub(crate) fn identify_error(err: ClusterError) -> HarnessError {
    match err {
        ClusterError::Unreachable(msg) => HarnessError::ControlPlane(msg),
        other => HarnessError::TargetNotFound(other.to_string()),
    }
}

/// What kind of thing a fault targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Pod,
    PodPool,
    Node,
    NetworkPath,
}

/// A transient reference to the victim of a fault, resolved at the moment of
/// injection.
#[derive(Debug, Clone)]
pub struct TargetIdentity {
    pub kind: TargetKind,
    /// Pod or node name; for pool faults, the selector describing the pool;
    /// for network faults, the severed path.
    pub name: String,
    pub namespace: Option<String>,
    /// Logical role held at capture time (e.g. "master").
    pub role: Option<String>,
    /// Service address held at capture time (cache master host:port).
    pub address: Option<String>,
    /// Ready-member count of a pool at capture time.
    pub baseline_ready: Option<usize>,
    /// When this identity was resolved. Pods with the same name but a later
    /// start time are fresh restarts, not the original victim.
    pub captured_at: DateTime<Utc>,
}

impl TargetIdentity {
    pub fn pod(name: impl Into<String>, namespace: impl Into<String>, role: Option<String>) -> Self {
        Self {
            kind: TargetKind::Pod,
            name: name.into(),
            namespace: Some(namespace.into()),
            role,
            address: None,
            baseline_ready: None,
            captured_at: Utc::now(),
        }
    }

    pub fn pool(selector: impl Into<String>, namespace: impl Into<String>, ready: usize) -> Self {
        Self {
            kind: TargetKind::PodPool,
            name: selector.into(),
            namespace: Some(namespace.into()),
            role: None,
            address: None,
            baseline_ready: Some(ready),
            captured_at: Utc::now(),
        }
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Node,
            name: name.into(),
            namespace: None,
            role: None,
            address: None,
            baseline_ready: None,
            captured_at: Utc::now(),
        }
    }

    pub fn network_path(description: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::NetworkPath,
            name: description.into(),
            namespace: Some(namespace.into()),
            role: None,
            address: None,
            baseline_ready: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// A destructive fault against one subsystem.
///
/// The orchestrator drives the sequence: `identify_target` before injection
/// (failure here means SKIPPED), `inject` against the captured identity
/// (failure here means FAILED without measurement), then repeated `recovered`
/// polls via the prober, and finally best-effort `rollback` during cleanup.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// Locate the current holder of the targeted role.
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError>;

    /// Perform the destructive action against the resolved target.
    async fn inject(&self, target: &TargetIdentity) -> Result<(), HarnessError>;

    /// Single-shot recovery predicate, evaluated against the *pre-fault*
    /// identity. Errors are treated by the prober as "not yet recovered".
    async fn recovered(&self, pre_fault: &TargetIdentity) -> Result<bool>;

    /// Undo any fault state that does not self-heal (network policies,
    /// cordoned nodes). Called in a best-effort cleanup phase regardless of
    /// scenario outcome; the default is a no-op for faults whose damage is
    /// intentionally irreversible (deleted pods).
    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_identity() {
        let id = TargetIdentity::pod("db-0", "prod", Some("master".into()));
        assert_eq!(id.kind, TargetKind::Pod);
        assert_eq!(id.name, "db-0");
        assert_eq!(id.namespace.as_deref(), Some("prod"));
        assert_eq!(id.role.as_deref(), Some("master"));
        assert!(id.baseline_ready.is_none());
    }

    #[test]
    fn test_pool_identity_carries_baseline() {
        let id = TargetIdentity::pool("app=web", "prod", 5);
        assert_eq!(id.kind, TargetKind::PodPool);
        assert_eq!(id.baseline_ready, Some(5));
    }

    #[test]
    fn test_with_address() {
        let id = TargetIdentity::pod("redis-0", "prod", Some("master".into()))
            .with_address("10.42.0.9:6379");
        assert_eq!(id.address.as_deref(), Some("10.42.0.9:6379"));
    }
}
