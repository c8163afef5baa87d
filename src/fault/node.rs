// Node Fault
//
// Cordons and drains a worker node currently hosting application pods.
// Recovery means zero pods remain scheduled on the drained node; the bound
// is deliberately longer than pod faults since rescheduling involves image
// pulls and cold starts, not just a restart. The node is uncordoned during
// cleanup so the run never leaves the cluster with reduced capacity.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::config::NodeFaultConfig;
use crate::error::HarnessError;
use crate::retry::{retry_cluster_op, RetryConfig};

use super::{identify_error, FaultInjector, TargetIdentity};

pub struct NodeDrainFault {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: NodeFaultConfig,
    retry: RetryConfig,
    /// Set once a node has actually been cordoned, so rollback only touches
    /// nodes this run degraded.
    drained: Mutex<Option<String>>,
}

impl NodeDrainFault {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: NodeFaultConfig) -> Self {
        Self {
            cluster,
            namespace,
            config,
            retry: RetryConfig::default(),
            drained: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FaultInjector for NodeDrainFault {
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
        let pods = retry_cluster_op(&self.retry, || {
            self.cluster
                .list_pods(&self.namespace, &self.config.app_selector)
        })
        .await
        .map_err(identify_error)?;

        let hosting_nodes: HashSet<String> = pods
            .iter()
            .filter(|p| p.is_available())
            .filter_map(|p| p.node_name.clone())
            .collect();

        let nodes = retry_cluster_op(&self.retry, || self.cluster.list_nodes())
            .await
            .map_err(identify_error)?;

        let victim = nodes
            .iter()
            .find(|n| n.ready && !n.unschedulable && hosting_nodes.contains(&n.name))
            .ok_or_else(|| {
                HarnessError::TargetNotFound(format!(
                    "no schedulable node hosts pods matching '{}'",
                    self.config.app_selector
                ))
            })?;

        info!("node fault will drain {}", victim.name);
        Ok(TargetIdentity::node(victim.name.clone()))
    }

    async fn inject(&self, target: &TargetIdentity) -> Result<(), HarnessError> {
        info!("cordoning node {}", target.name);
        self.cluster.cordon_node(&target.name).await?;
        *self.drained.lock().await = Some(target.name.clone());

        info!("draining node {}", target.name);
        self.cluster.drain_node(&target.name).await?;
        Ok(())
    }

    async fn recovered(&self, pre_fault: &TargetIdentity) -> Result<bool> {
        // Every pod in the namespace counts, not just the app selector: a
        // stray workload left on the node means the drain has not finished.
        let pods = self.cluster.list_pods(&self.namespace, "").await?;
        Ok(!pods
            .iter()
            .any(|p| p.node_name.as_deref() == Some(pre_fault.name.as_str())))
    }

    async fn rollback(&self) -> Result<()> {
        let mut drained = self.drained.lock().await;
        if let Some(name) = drained.take() {
            info!("uncordoning node {}", name);
            if let Err(err) = self.cluster.uncordon_node(&name).await {
                warn!("failed to uncordon {}: {}", name, err);
                *drained = Some(name);
                return Err(err.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{make_node, make_pod, MockCluster};
    use crate::fault::TargetKind;

    fn fault(cluster: Arc<MockCluster>) -> NodeDrainFault {
        NodeDrainFault::new(
            cluster,
            "prod".to_string(),
            NodeFaultConfig {
                enabled: true,
                ..NodeFaultConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_identify_picks_schedulable_hosting_node() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_pod_listings(vec![vec![
                    make_pod("web-0", &[("app", "web")], true, Some("worker-2")),
                ]])
                .with_nodes(vec![
                    make_node("worker-1", false),
                    make_node("worker-2", false),
                ]),
        );
        let target = fault(cluster).identify_target().await.unwrap();
        assert_eq!(target.kind, TargetKind::Node);
        assert_eq!(target.name, "worker-2");
    }

    #[tokio::test]
    async fn test_identify_skips_cordoned_nodes() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_pod_listings(vec![vec![
                    make_pod("web-0", &[("app", "web")], true, Some("worker-1")),
                ]])
                .with_nodes(vec![make_node("worker-1", true)]),
        );
        let err = fault(cluster).identify_target().await.unwrap_err();
        assert!(matches!(err, HarnessError::TargetNotFound(_)));
    }

    #[tokio::test]
    async fn test_inject_cordons_then_drains() {
        let cluster = Arc::new(MockCluster::new());
        let injector = fault(Arc::clone(&cluster));
        injector
            .inject(&TargetIdentity::node("worker-1"))
            .await
            .unwrap();
        assert_eq!(cluster.cordoned.lock().unwrap().as_slice(), ["worker-1"]);
        assert_eq!(cluster.drained.lock().unwrap().as_slice(), ["worker-1"]);
    }

    #[tokio::test]
    async fn test_recovery_requires_empty_node() {
        let cluster = Arc::new(MockCluster::new().with_pod_listings(vec![
            vec![make_pod("web-0", &[("app", "web")], true, Some("worker-1"))],
            vec![make_pod("web-0", &[("app", "web")], true, Some("worker-2"))],
        ]));
        let injector = fault(cluster);
        let pre = TargetIdentity::node("worker-1");

        assert!(!injector.recovered(&pre).await.unwrap());
        assert!(injector.recovered(&pre).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_uncordons_only_after_inject() {
        let cluster = Arc::new(MockCluster::new());
        let injector = fault(Arc::clone(&cluster));

        // Nothing drained yet: rollback is a no-op.
        injector.rollback().await.unwrap();
        assert!(cluster.uncordoned.lock().unwrap().is_empty());

        injector
            .inject(&TargetIdentity::node("worker-1"))
            .await
            .unwrap();
        injector.rollback().await.unwrap();
        assert_eq!(cluster.uncordoned.lock().unwrap().as_slice(), ["worker-1"]);

        // Rollback is idempotent.
        injector.rollback().await.unwrap();
        assert_eq!(cluster.uncordoned.lock().unwrap().len(), 1);
    }
}
