// Cluster Control-Plane Client
//
// The harness is a client of a Kubernetes-style control plane: it lists pods
// and nodes by label, force-deletes pods, cordons and drains nodes, applies
// and removes network policies, and reads autoscaler status. Everything sits
// behind the `ClusterApi` trait so tests substitute a scripted mock for the
// kubectl-backed production client.
//
// Predicates consume the typed fields on `PodInfo`/`NodeInfo`/`HpaStatus`,
// never raw command output, so their correctness does not depend on
// output-format stability.

pub mod kubectl;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use kubectl::KubectlClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the cluster client.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The control plane itself cannot be reached. Treated as fatal by the
    /// orchestrator.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// A control-plane command was rejected (permissions, missing resource).
    #[error("command failed ({command}): {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The client binary could not be spawned at all.
    #[error("failed to spawn control-plane client: {0}")]
    Spawn(#[from] std::io::Error),

    /// The control plane returned output we could not parse.
    #[error("failed to parse control-plane response: {0}")]
    Parse(String),
}

impl ClusterError {
    /// Transient errors are worth retrying with backoff; rejections and
    /// parse failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::CommandFailed { stderr, .. } => {
                let msg = stderr.to_lowercase();
                msg.contains("timed out")
                    || msg.contains("timeout")
                    || msg.contains("too many requests")
                    || msg.contains("etcdserver")
                    || msg.contains("temporarily unavailable")
            }
            ClusterError::Spawn(_) => false,
            ClusterError::Unreachable(_) => false,
            ClusterError::Parse(_) => false,
        }
    }
}

/// Pod lifecycle phase as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Typed view of a pod, carrying only the fields predicates need.
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub phase: PodPhase,
    pub ready: bool,
    pub node_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub pod_ip: Option<String>,
}

impl PodInfo {
    /// Running and passing its readiness checks.
    pub fn is_available(&self) -> bool {
        self.phase == PodPhase::Running && self.ready
    }
}

/// Typed view of a node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
}

/// HorizontalPodAutoscaler status snapshot.
#[derive(Debug, Clone)]
pub struct HpaStatus {
    pub name: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub current_replicas: u32,
    pub desired_replicas: u32,
    /// Current average CPU utilization percentage, when the metric has been
    /// sampled by the autoscaler.
    pub cpu_percent: Option<u32>,
}

/// Control-plane operations the harness performs.
///
/// Implemented by `KubectlClient` in production and by scripted mocks in
/// tests.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List pods in a namespace matching a label selector. An empty selector
    /// lists every pod in the namespace.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, ClusterError>;

    /// Delete a pod. `force` skips the grace period, for fault injection that
    /// must look like a crash rather than a graceful shutdown.
    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), ClusterError>;

    /// Run a command inside a pod and return its stdout.
    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> Result<String, ClusterError>;

    /// List cluster nodes.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError>;

    /// Mark a node unschedulable.
    async fn cordon_node(&self, name: &str) -> Result<(), ClusterError>;

    /// Evict all evictable pods from a node.
    async fn drain_node(&self, name: &str) -> Result<(), ClusterError>;

    /// Restore a node to schedulable.
    async fn uncordon_node(&self, name: &str) -> Result<(), ClusterError>;

    /// Apply a manifest (used for NetworkPolicy injection).
    async fn apply_manifest(&self, manifest: &str) -> Result<(), ClusterError>;

    /// Remove a previously injected network policy. Missing policies are not
    /// an error, so cleanup is safe to run in every outcome.
    async fn delete_network_policy(&self, namespace: &str, name: &str)
        -> Result<(), ClusterError>;

    /// Read autoscaler status for a deployment.
    async fn hpa_status(&self, namespace: &str, name: &str) -> Result<HpaStatus, ClusterError>;
}
