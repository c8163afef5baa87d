// Scripted in-memory ClusterApi for the test suite.
//
// Pod listings and HPA statuses are queues consumed one per call, with the
// last entry repeating once exhausted, so a test can script a cluster that
// changes state across successive polls. Destructive actions are recorded for
// assertion. Exec is delegated to a settable handler closure.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ClusterApi, ClusterError, HpaStatus, NodeInfo, PodInfo, PodPhase};

type ExecHandler =
    Box<dyn Fn(&str, &[&str]) -> Result<String, ClusterError> + Send + Sync + 'static>;

#[derive(Default)]
pub struct MockCluster {
    pod_listings: Mutex<Vec<Vec<PodInfo>>>,
    pod_calls: AtomicUsize,
    nodes: Mutex<Vec<NodeInfo>>,
    hpa_statuses: Mutex<Vec<HpaStatus>>,
    hpa_calls: AtomicUsize,
    exec_handler: Mutex<Option<ExecHandler>>,
    unreachable: AtomicBool,

    pub deleted_pods: Mutex<Vec<(String, bool)>>,
    pub cordoned: Mutex<Vec<String>>,
    pub drained: Mutex<Vec<String>>,
    pub uncordoned: Mutex<Vec<String>>,
    pub applied_manifests: Mutex<Vec<String>>,
    pub deleted_policies: Mutex<Vec<String>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue successive pod listings; the last one repeats once exhausted.
    pub fn with_pod_listings(self, listings: Vec<Vec<PodInfo>>) -> Self {
        *self.pod_listings.lock().unwrap() = listings;
        self
    }

    pub fn with_nodes(self, nodes: Vec<NodeInfo>) -> Self {
        *self.nodes.lock().unwrap() = nodes;
        self
    }

    /// Queue successive HPA statuses; the last one repeats once exhausted.
    pub fn with_hpa_statuses(self, statuses: Vec<HpaStatus>) -> Self {
        *self.hpa_statuses.lock().unwrap() = statuses;
        self
    }

    pub fn with_exec_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&str, &[&str]) -> Result<String, ClusterError> + Send + Sync + 'static,
    {
        *self.exec_handler.lock().unwrap() = Some(Box::new(handler));
        self
    }

    /// Make every subsequent call fail as control-plane-unreachable.
    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), ClusterError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ClusterError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Build a ready Running pod with the given labels.
pub fn make_pod(name: &str, labels: &[(&str, &str)], ready: bool, node: Option<&str>) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: "default".to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        phase: if ready { PodPhase::Running } else { PodPhase::Pending },
        ready,
        node_name: node.map(str::to_string),
        started_at: Some(Utc::now()),
        pod_ip: Some("10.42.0.10".to_string()),
    }
}

pub fn make_node(name: &str, unschedulable: bool) -> NodeInfo {
    NodeInfo {
        name: name.to_string(),
        ready: true,
        unschedulable,
    }
}

pub fn make_hpa(current: u32, desired: u32, min: u32, max: u32, cpu: Option<u32>) -> HpaStatus {
    HpaStatus {
        name: "web".to_string(),
        min_replicas: min,
        max_replicas: max,
        current_replicas: current,
        desired_replicas: desired,
        cpu_percent: cpu,
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_pods(&self, _namespace: &str, _selector: &str) -> Result<Vec<PodInfo>, ClusterError> {
        self.check_reachable()?;
        let listings = self.pod_listings.lock().unwrap();
        if listings.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self
            .pod_calls
            .fetch_add(1, Ordering::SeqCst)
            .min(listings.len() - 1);
        Ok(listings[idx].clone())
    }

    async fn delete_pod(&self, _namespace: &str, name: &str, force: bool) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.deleted_pods
            .lock()
            .unwrap()
            .push((name.to_string(), force));
        Ok(())
    }

    async fn exec_in_pod(
        &self,
        _namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> Result<String, ClusterError> {
        self.check_reachable()?;
        let handler = self.exec_handler.lock().unwrap();
        match handler.as_ref() {
            Some(h) => h(pod, command),
            None => Ok(String::new()),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        self.check_reachable()?;
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn cordon_node(&self, name: &str) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.cordoned.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn drain_node(&self, name: &str) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.drained.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn uncordon_node(&self, name: &str) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.uncordoned.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.applied_manifests
            .lock()
            .unwrap()
            .push(manifest.to_string());
        Ok(())
    }

    async fn delete_network_policy(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.check_reachable()?;
        self.deleted_policies.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn hpa_status(&self, _namespace: &str, _name: &str) -> Result<HpaStatus, ClusterError> {
        self.check_reachable()?;
        let statuses = self.hpa_statuses.lock().unwrap();
        if statuses.is_empty() {
            return Err(ClusterError::CommandFailed {
                command: "get hpa".into(),
                stderr: "no HPA scripted".into(),
            });
        }
        let idx = self
            .hpa_calls
            .fetch_add(1, Ordering::SeqCst)
            .min(statuses.len() - 1);
        Ok(statuses[idx].clone())
    }
}
