// Data-Integrity Probes
//
// A probe writes a uniquely named marker before a fault is injected and
// verifies it after recovery. Verification always re-resolves the current
// role holder; the pre-fault pod may no longer exist or may have been
// demoted, and reading from it would prove nothing about the surviving
// dataset.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::CacheFaultConfig;
use crate::error::HarnessError;
use crate::fault::cache::find_master_pod;

/// Result of a post-recovery marker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityOutcome {
    Intact,
    Lost {
        key: String,
        expected: String,
        actual: Option<String>,
    },
}

impl IntegrityOutcome {
    pub fn is_intact(&self) -> bool {
        matches!(self, IntegrityOutcome::Intact)
    }

    pub fn describe(&self) -> String {
        match self {
            IntegrityOutcome::Intact => "integrity marker survived".to_string(),
            IntegrityOutcome::Lost {
                key,
                expected,
                actual,
            } => match actual {
                Some(actual) => format!(
                    "integrity marker {} corrupted: expected '{}', found '{}'",
                    key, expected, actual
                ),
                None => format!("integrity marker {} lost during failover", key),
            },
        }
    }
}

#[async_trait]
pub trait IntegrityProbe: Send + Sync {
    /// Write the marker to the current primary before the fault lands.
    async fn write_marker(&self) -> Result<(), HarnessError>;

    /// Re-resolve the primary after recovery and check the marker.
    async fn verify(&self) -> Result<IntegrityOutcome, HarnessError>;
}

/// Marker probe for the replicated cache: SET on the current master, wait
/// for one replica to acknowledge, GET on whichever pod is master after the
/// failover.
pub struct CacheKeyProbe {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: CacheFaultConfig,
    key: String,
    value: String,
}

impl CacheKeyProbe {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: CacheFaultConfig) -> Self {
        let id = Uuid::new_v4();
        Self {
            cluster,
            namespace,
            config,
            key: format!("integrity-marker-{}", id),
            value: id.to_string(),
        }
    }

    async fn current_master(&self) -> Result<String, HarnessError> {
        let master = find_master_pod(
            self.cluster.as_ref(),
            &self.namespace,
            &self.config.pod_selector,
            self.config.port,
        )
        .await
        .map_err(marker_error)?
        .ok_or_else(|| {
            HarnessError::TargetNotFound(
                "no cache master available for integrity marker".to_string(),
            )
        })?;
        Ok(master.name)
    }

    async fn redis_cli(&self, pod: &str, args: &[&str]) -> Result<String, ClusterError> {
        let port = self.config.port.to_string();
        let mut command = vec!["redis-cli", "-p", &port];
        command.extend_from_slice(args);
        self.cluster
            .exec_in_pod(&self.namespace, pod, &command)
            .await
    }
}

#[async_trait]
impl IntegrityProbe for CacheKeyProbe {
    async fn write_marker(&self) -> Result<(), HarnessError> {
        let master = self.current_master().await?;
        debug!("writing integrity marker {} via {}", self.key, master);

        let out = self
            .redis_cli(&master, &["set", &self.key, &self.value])
            .await
            .map_err(marker_error)?;
        if out.trim() != "OK" {
            return Err(HarnessError::TargetNotFound(format!(
                "marker write rejected by {}: {}",
                master,
                out.trim()
            )));
        }

        // Best-effort replication ack. A marker only on the doomed master
        // would make data loss a certainty rather than a finding, but a slow
        // replica should not veto the scenario.
        match self.redis_cli(&master, &["wait", "1", "500"]).await {
            Ok(acked) if acked.trim() == "0" => {
                warn!("integrity marker {} not yet replicated", self.key)
            }
            Ok(_) => {}
            Err(err) => warn!("replication ack for marker {} failed: {}", self.key, err),
        }
        Ok(())
    }

    async fn verify(&self) -> Result<IntegrityOutcome, HarnessError> {
        let master = self.current_master().await?;
        let out = self
            .redis_cli(&master, &["get", &self.key])
            .await
            .map_err(HarnessError::from)?;

        let found = out.trim();
        if found == self.value {
            Ok(IntegrityOutcome::Intact)
        } else {
            Ok(IntegrityOutcome::Lost {
                key: self.key.clone(),
                expected: self.value.clone(),
                actual: (!found.is_empty()).then(|| found.to_string()),
            })
        }
    }
}

/// Marker failures before injection are identification-phase failures: the
/// scenario should be skipped, not failed, unless the control plane itself
/// is gone.
fn marker_error(err: ClusterError) -> HarnessError {
    match err {
        ClusterError::Unreachable(msg) => HarnessError::ControlPlane(msg),
        other => HarnessError::TargetNotFound(other.to_string()),
    }
}
