// Primary-Database Fault
//
// Identifies the pod currently holding the database primary role via its
// role label (Patroni-style operators keep this label on the leader) and
// force-deletes it. Recovery means a pod holds the primary role again, is a
// different pod than the victim (or the same name freshly restarted), and
// the application tier can still reach its database.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::config::DatabaseFaultConfig;
use crate::error::HarnessError;
use crate::retry::{retry_cluster_op, RetryConfig};

use super::{identify_error, FaultInjector, TargetIdentity};

pub struct DatabasePrimaryFault {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: DatabaseFaultConfig,
    retry: RetryConfig,
    http: reqwest::Client,
}

impl DatabasePrimaryFault {
    pub fn new(cluster: Arc<dyn ClusterApi>, namespace: String, config: DatabaseFaultConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            cluster,
            namespace,
            config,
            retry: RetryConfig::default(),
            http,
        }
    }

    /// Application-tier configuration check: the app must report its database
    /// reachable before failover counts as complete. Skipped when no endpoint
    /// is configured.
    async fn app_sees_database(&self) -> bool {
        let Some(url) = &self.config.app_health_url else {
            return true;
        };
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                warn!("app health check not passing yet: {}", err);
                false
            }
        }
    }
}

#[async_trait]
impl FaultInjector for DatabasePrimaryFault {
    async fn identify_target(&self) -> Result<TargetIdentity, HarnessError> {
        let pods = retry_cluster_op(&self.retry, || {
            self.cluster
                .list_pods(&self.namespace, &self.config.primary_selector)
        })
        .await
        .map_err(identify_error)?;

        let primary = pods
            .iter()
            .find(|p| p.is_available())
            .ok_or_else(|| {
                HarnessError::TargetNotFound(format!(
                    "no available pod matches primary selector '{}' in namespace '{}'",
                    self.config.primary_selector, self.namespace
                ))
            })?;

        info!("database primary is {}", primary.name);
        Ok(TargetIdentity::pod(
            primary.name.clone(),
            self.namespace.clone(),
            Some("primary".to_string()),
        ))
    }

    async fn inject(&self, target: &TargetIdentity) -> Result<(), HarnessError> {
        info!("force-deleting database primary {}", target.name);
        self.cluster
            .delete_pod(&self.namespace, &target.name, true)
            .await?;
        Ok(())
    }

    async fn recovered(&self, pre_fault: &TargetIdentity) -> Result<bool> {
        let pods = self
            .cluster
            .list_pods(&self.namespace, &self.config.primary_selector)
            .await?;

        // The role must be held again, by a new identity or by the same name
        // freshly restarted. The captured identity is never treated as proof
        // of recovery on its own.
        let new_primary = pods.iter().filter(|p| p.is_available()).find(|p| {
            p.name != pre_fault.name
                || p.started_at
                    .map(|t| t > pre_fault.captured_at)
                    .unwrap_or(false)
        });

        if new_primary.is_none() {
            return Ok(false);
        }
        Ok(self.app_sees_database().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{make_pod, MockCluster};
    use chrono::Utc;

    fn primary_pod(name: &str) -> crate::cluster::PodInfo {
        make_pod(
            name,
            &[("application", "spilo"), ("spilo-role", "master")],
            true,
            Some("worker-1"),
        )
    }

    fn fault(cluster: Arc<MockCluster>) -> DatabasePrimaryFault {
        DatabasePrimaryFault::new(cluster, "prod".to_string(), DatabaseFaultConfig::default())
    }

    #[tokio::test]
    async fn test_identify_finds_available_primary() {
        let cluster = Arc::new(
            MockCluster::new().with_pod_listings(vec![vec![primary_pod("db-main-0")]]),
        );
        let target = fault(cluster).identify_target().await.unwrap();
        assert_eq!(target.name, "db-main-0");
        assert_eq!(target.role.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn test_identify_skips_when_no_primary() {
        let cluster = Arc::new(MockCluster::new());
        let err = fault(cluster).identify_target().await.unwrap_err();
        assert!(matches!(err, HarnessError::TargetNotFound(_)));
    }

    #[tokio::test]
    async fn test_identify_is_fatal_when_unreachable() {
        let cluster = Arc::new(MockCluster::new());
        cluster.set_unreachable();
        let err = fault(cluster).identify_target().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_inject_force_deletes_victim() {
        let cluster = Arc::new(MockCluster::new());
        let injector = fault(Arc::clone(&cluster));
        let target = TargetIdentity::pod("db-main-0", "prod", Some("primary".into()));
        injector.inject(&target).await.unwrap();
        assert_eq!(
            cluster.deleted_pods.lock().unwrap().as_slice(),
            [("db-main-0".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_recovery_requires_new_identity_for_same_role() {
        // Same pod name, started before capture: not recovered yet.
        let mut stale = primary_pod("db-main-0");
        stale.started_at = Some(Utc::now() - chrono::Duration::minutes(10));

        let cluster = Arc::new(MockCluster::new().with_pod_listings(vec![
            vec![stale],
            vec![primary_pod("db-main-1")],
        ]));
        let injector = fault(cluster);
        let pre = TargetIdentity::pod("db-main-0", "prod", Some("primary".into()));

        assert!(!injector.recovered(&pre).await.unwrap());
        assert!(injector.recovered(&pre).await.unwrap());
    }

    #[tokio::test]
    async fn test_recovery_accepts_fresh_restart_of_same_name() {
        // Same name but started after the identity was captured: a fresh pod.
        let pre = TargetIdentity::pod("db-main-0", "prod", Some("primary".into()));
        let cluster =
            Arc::new(MockCluster::new().with_pod_listings(vec![vec![primary_pod("db-main-0")]]));
        assert!(fault(cluster).recovered(&pre).await.unwrap());
    }
}
