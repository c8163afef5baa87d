// Cache-Primary Fault
//
// The cache master is found by replication-role introspection (`INFO
// replication` inside each cache pod), never by pod name or label alone.
// The pre-fault master address comes from the sentinel quorum; recovery
// means the quorum reports a master address different from the pre-fault
// one. Data integrity across the failover is checked separately by the
// cache key probe.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::cluster::{ClusterApi, ClusterError, PodInfo};
use crate::config::CacheFaultConfig;
use crate::error::HarnessError;
use crate::retry::{retry_cluster_op, RetryConfig};

use super::{identify_error, FaultInjector, TargetIdentity};

pub struct CachePrimaryFault {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: CacheFaultConfig,
    retry: RetryConfig,
}

impl CachePrimaryFault {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: CacheFaultConfig) -> Self {
        Self {
            cluster,
            namespace,
            config,
            retry: RetryConfig::default(),
        }
    }

    async fn find_master_pod(&self) -> Result<Option<PodInfo>, ClusterError> {
        find_master_pod(
            self.cluster.as_ref(),
            &self.namespace,
            &self.config.pod_selector,
            self.config.port,
        )
        .await
    }

    /// Ask the sentinel quorum which address it currently considers master.
    async fn sentinel_master_addr(&self) -> Result<Option<String>, ClusterError> {
        let sentinels = self
            .cluster
            .list_pods(&self.namespace, &self.config.sentinel_selector)
            .await?;
        let Some(sentinel) = sentinels.iter().find(|p| p.is_available()) else {
            return Ok(None);
        };

        let port = self.config.sentinel_port.to_string();
        let out = self
            .cluster
            .exec_in_pod(
                &self.namespace,
                &sentinel.name,
                &[
                    "redis-cli",
                    "-p",
                    &port,
                    "sentinel",
                    "get-master-addr-by-name",
                    &self.config.master_name,
                ],
            )
            .await?;
        Ok(parse_master_addr(&out))
    }
}

#[async_trait]
impl FaultInjector for CachePrimaryFault {
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
        let master = retry_cluster_op(&self.retry, || self.find_master_pod())
            .await
            .map_err(identify_error)?
            .ok_or_else(|| {
                HarnessError::TargetNotFound(format!(
                    "no cache pod reports role:master under selector '{}'",
                    self.config.pod_selector
                ))
            })?;

        let address = retry_cluster_op(&self.retry, || self.sentinel_master_addr())
            .await
            .map_err(identify_error)?
            .ok_or_else(|| {
                HarnessError::TargetNotFound(
                    "sentinel quorum did not report a master address".to_string(),
                )
            })?;

        info!("cache master is {} at {}", master.name, address);
        Ok(
            TargetIdentity::pod(master.name, self.namespace.clone(), Some("master".to_string()))
                .with_address(address),
        )
    }

    async fn inject(&self, target: &TargetIdentity) -> Result<(), HarnessError> {
        info!("force-deleting cache master {}", target.name);
        self.cluster
            .delete_pod(&self.namespace, &target.name, true)
            .await?;
        Ok(())
    }

    async fn recovered(&self, pre_fault: &TargetIdentity) -> Result<bool> {
        let Some(addr) = self.sentinel_master_addr().await? else {
            return Ok(false);
        };
        // Failover is complete once the quorum converges on a new address.
        Ok(Some(addr.as_str()) != pre_fault.address.as_deref())
    }
}

/// Locate the pod currently acting as cache master by asking each available
/// pod for its replication role. Shared with the cache integrity probe so
/// both always agree on what "master" means.
pub(crate) async fn find_master_pod(
    cluster: &dyn ClusterApi,
    namespace: &str,
    selector: &str,
    port: u16,
) -> Result<Option<PodInfo>, ClusterError> {
    let pods = cluster.list_pods(namespace, selector).await?;
    let port = port.to_string();

    for pod in pods.into_iter().filter(|p| p.is_available()) {
        let out = cluster
            .exec_in_pod(
                namespace,
                &pod.name,
                &["redis-cli", "-p", &port, "info", "replication"],
            )
            .await?;
        if parse_replication_role(&out) == Some("master") {
            return Ok(Some(pod));
        }
    }
    Ok(None)
}

/// Pull the `role:` field out of `INFO replication` output.
fn parse_replication_role(info: &str) -> Option<&str> {
    info.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("role:"))
}

/// `SENTINEL get-master-addr-by-name` prints the ip and port on separate
/// lines.
fn parse_master_addr(out: &str) -> Option<String> {
    let mut lines = out.lines().map(str::trim).filter(|l| !l.is_empty());
    let ip = lines.next()?;
    let port = lines.next()?;
    Some(format!("{}:{}", ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{make_pod, MockCluster};

    const MASTER_INFO: &str = "# Replication\r\nrole:master\r\nconnected_slaves:2\r\n";
    const REPLICA_INFO: &str = "# Replication\r\nrole:slave\r\nmaster_host:10.42.0.9\r\n";

    fn cache_pods() -> Vec<crate::cluster::PodInfo> {
        vec![
            make_pod("redis-0", &[("app", "redis")], true, Some("worker-1")),
            make_pod("redis-1", &[("app", "redis")], true, Some("worker-2")),
            make_pod("sentinel-0", &[("app", "redis-sentinel")], true, None),
        ]
    }

    fn scripted_cluster(master_addr: &'static str) -> Arc<MockCluster> {
        Arc::new(
            MockCluster::new()
                .with_pod_listings(vec![cache_pods()])
                .with_exec_handler(move |pod, command| {
                    if command.contains(&"get-master-addr-by-name") {
                        Ok(format!("{}\n6379\n", master_addr))
                    } else if pod == "redis-1" {
                        Ok(MASTER_INFO.to_string())
                    } else {
                        Ok(REPLICA_INFO.to_string())
                    }
                }),
        )
    }

    #[test]
    fn test_parse_replication_role() {
        assert_eq!(parse_replication_role(MASTER_INFO), Some("master"));
        assert_eq!(parse_replication_role(REPLICA_INFO), Some("slave"));
        assert_eq!(parse_replication_role("# Server\r\n"), None);
    }

    #[test]
    fn test_parse_master_addr() {
        assert_eq!(
            parse_master_addr("10.42.0.9\n6379\n").as_deref(),
            Some("10.42.0.9:6379")
        );
        assert_eq!(parse_master_addr(""), None);
    }

    #[tokio::test]
    async fn test_identify_uses_replication_role_not_labels() {
        let fault = CachePrimaryFault::new(
            scripted_cluster("10.42.0.9"),
            "prod".to_string(),
            CacheFaultConfig::default(),
        );
        let target = fault.identify_target().await.unwrap();
        assert_eq!(target.name, "redis-1");
        assert_eq!(target.address.as_deref(), Some("10.42.0.9:6379"));
    }

    #[tokio::test]
    async fn test_identify_skips_without_master() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_pod_listings(vec![cache_pods()])
                .with_exec_handler(|_, _| Ok(REPLICA_INFO.to_string())),
        );
        let fault =
            CachePrimaryFault::new(cluster, "prod".to_string(), CacheFaultConfig::default());
        let err = fault.identify_target().await.unwrap_err();
        assert!(matches!(err, HarnessError::TargetNotFound(_)));
    }

    #[tokio::test]
    async fn test_recovery_requires_new_master_address() {
        let pre = TargetIdentity::pod("redis-1", "prod", Some("master".into()))
            .with_address("10.42.0.9:6379");

        // Quorum still reports the pre-fault address: not recovered.
        let fault = CachePrimaryFault::new(
            scripted_cluster("10.42.0.9"),
            "prod".to_string(),
            CacheFaultConfig::default(),
        );
        assert!(!fault.recovered(&pre).await.unwrap());

        // Quorum converged on a different address: recovered.
        let fault = CachePrimaryFault::new(
            scripted_cluster("10.42.0.23"),
            "prod".to_string(),
            CacheFaultConfig::default(),
        );
        assert!(fault.recovered(&pre).await.unwrap());
    }
}
