// Network-Partition Fault
//
// Applies a deny-all-ingress NetworkPolicy that severs an expected
// communication path, asserts the path actually became unreachable (the
// inverse of recovery), then removes the policy. Recovery is the path
// becoming reachable again after removal. Unlike pod faults, this fault owns
// its rollback: `rollback()` re-deletes the policy (ignore-not-found) so the
// end-of-run cleanup phase can never leave the policy behind.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::NetworkFaultConfig;
use crate::error::HarnessError;
use crate::retry::{retry_cluster_op, RetryConfig};

use super::{identify_error, FaultInjector, TargetIdentity};

/// How long the severed path may take to actually go dark before the
/// injection is considered failed.
const PARTITION_ASSERT_TIMEOUT: Duration = Duration::from_secs(30);
const PARTITION_ASSERT_INTERVAL: Duration = Duration::from_secs(2);

pub struct NetworkPartitionFault {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: NetworkFaultConfig,
    retry: RetryConfig,
}

impl NetworkPartitionFault {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: NetworkFaultConfig) -> Self {
        Self {
            cluster,
            namespace,
            config,
            retry: RetryConfig::default(),
        }
    }

    /// Probe the path from inside a client pod. A non-zero curl exit means
    /// unreachable; an unreachable control plane propagates as an error.
    async fn path_reachable(&self) -> Result<bool, ClusterError> {
        let clients = self
            .cluster
            .list_pods(&self.namespace, &self.config.client_selector)
            .await?;
        let Some(client) = clients.iter().find(|p| p.is_available()) else {
            return Err(ClusterError::CommandFailed {
                command: "path probe".to_string(),
                stderr: format!(
                    "no available client pod under selector '{}'",
                    self.config.client_selector
                ),
            });
        };

        match self
            .cluster
            .exec_in_pod(
                &self.namespace,
                &client.name,
                &["curl", "-sf", "--max-time", "2", &self.config.probe_url],
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(ClusterError::CommandFailed { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl FaultInjector for NetworkPartitionFault {
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
        // The "target" is the path itself; confirm it is reachable before
        // severing it, otherwise a pass would prove nothing.
        let reachable = retry_cluster_op(&self.retry, || self.path_reachable())
            .await
            .map_err(identify_error)?;
        if !reachable {
            return Err(HarnessError::TargetNotFound(format!(
                "path to {} is already unreachable before injection",
                self.config.probe_url
            )));
        }

        Ok(TargetIdentity::network_path(
            format!("{} -> {}", self.config.client_selector, self.config.probe_url),
            self.namespace.clone(),
        ))
    }

    async fn inject(&self, target: &TargetIdentity) -> Result<(), HarnessError> {
        let manifest = deny_ingress_policy(
            &self.config.policy_name,
            &self.namespace,
            &self.config.target_label,
            &self.config.target_value,
        );
        info!("applying deny-ingress policy {}", self.config.policy_name);
        self.cluster.apply_manifest(&manifest).await?;

        // The injected assertion is the opposite of recovery: the path must
        // actually go dark while the policy is in force.
        let deadline = Instant::now() + PARTITION_ASSERT_TIMEOUT;
        loop {
            match self.path_reachable().await {
                Ok(false) => break,
                Ok(true) if Instant::now() >= deadline => {
                    // Leave nothing behind when the injection itself failed.
                    if let Err(err) = self.rollback().await {
                        warn!("policy cleanup after failed injection: {}", err);
                    }
                    return Err(HarnessError::InjectionFailed(format!(
                        "path {} remained reachable while the deny policy was in force",
                        target.name
                    )));
                }
                Ok(true) => {}
                Err(err) => return Err(err.into()),
            }
            sleep(PARTITION_ASSERT_INTERVAL).await;
        }

        info!("partition confirmed, removing policy {}", self.config.policy_name);
        self.cluster
            .delete_network_policy(&self.namespace, &self.config.policy_name)
            .await?;
        Ok(())
    }

    async fn recovered(&self, _pre_fault: &TargetIdentity) -> Result<bool> {
        Ok(self.path_reachable().await?)
    }

    async fn rollback(&self) -> Result<()> {
        self.cluster
            .delete_network_policy(&self.namespace, &self.config.policy_name)
            .await?;
        Ok(())
    }
}

/// Deny-all-ingress policy scoped to one label.
fn deny_ingress_policy(name: &str, namespace: &str, label: &str, value: &str) -> String {
    format!(
        "apiVersion: networking.k8s.io/v1\n\
         kind: NetworkPolicy\n\
         metadata:\n\
         \x20 name: {name}\n\
         \x20 namespace: {namespace}\n\
         spec:\n\
         \x20 podSelector:\n\
         \x20   matchLabels:\n\
         \x20     {label}: {value}\n\
         \x20 policyTypes:\n\
         \x20 - Ingress\n"
    )
}
