// Application-Replica Fault
//
// Deletes N replicas at random from a labelled pool. This exercises
// self-healing (the controller replacing pods to restore the desired count),
// not failover, so recovery is simply the ready count returning to the
// pre-fault baseline.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::cluster::ClusterApi;
use crate::config::ReplicaFaultConfig;
use crate::error::HarnessError;
use crate::retry::{retry_cluster_op, RetryConfig};

use super::{identify_error, FaultInjector, TargetIdentity};

pub struct ReplicaPoolFault {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: ReplicaFaultConfig,
    retry: RetryConfig,
}

impl ReplicaPoolFault {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: ReplicaFaultConfig) -> Self {
        Self {
            cluster,
            namespace,
            config,
            retry: RetryConfig::default(),
        }
    }
}

#[async_trait]
impl FaultInjector for ReplicaPoolFault {
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
        let pods = retry_cluster_op(&self.retry, || {
            self.cluster.list_pods(&self.namespace, &self.config.selector)
        })
        .await
        .map_err(identify_error)?;

        let ready = pods.iter().filter(|p| p.is_available()).count();
        if ready == 0 {
            return Err(HarnessError::TargetNotFound(format!(
                "no ready replicas under selector '{}'",
                self.config.selector
            )));
        }

        info!(
            "replica pool '{}' has {} ready members",
            self.config.selector, ready
        );
        Ok(TargetIdentity::pool(
            self.config.selector.clone(),
            self.namespace.clone(),
            ready,
        ))
    }

    async fn inject(&self, _target: &TargetIdentity) -> Result<(), HarnessError> {
        // Victims are re-resolved at injection time; the pool identity only
        // carries the baseline count.
        let pods = self
            .cluster
            .list_pods(&self.namespace, &self.config.selector)
            .await?;

        let mut ready: Vec<_> = pods.into_iter().filter(|p| p.is_available()).collect();
        if ready.is_empty() {
            return Err(HarnessError::InjectionFailed(
                "replica pool emptied before injection".to_string(),
            ));
        }

        fastrand::shuffle(&mut ready);
        let victims = ready
            .iter()
            .take(self.config.kill_count.min(ready.len()))
            .collect::<Vec<_>>();

        for victim in victims {
            info!("deleting replica {}", victim.name);
            self.cluster
                .delete_pod(&self.namespace, &victim.name, false)
                .await?;
        }
        Ok(())
    }

    async fn recovered(&self, pre_fault: &TargetIdentity) -> Result<bool> {
        let pods = self
            .cluster
            .list_pods(&self.namespace, &self.config.selector)
            .await?;
        let ready = pods.iter().filter(|p| p.is_available()).count();
        Ok(ready >= pre_fault.baseline_ready.unwrap_or(1))
    }
}
