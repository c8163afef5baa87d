// kubectl-backed ClusterApi implementation
//
// Drives the `kubectl` binary with `-o json` and deserializes the structured
// output into the typed views in `cluster::mod`. Only the fields the harness
// reads are modelled; unknown fields are ignored by serde.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ClusterApi, ClusterError, HpaStatus, NodeInfo, PodInfo, PodPhase};

/// Production cluster client shelling out to `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl_path: String,
    context: Option<String>,
}

impl KubectlClient {
    pub fn new(kubectl_path: impl Into<String>, context: Option<String>) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            context,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ClusterError> {
        self.run_with_stdin(args, None).await
    }

    async fn run_with_stdin(
        &self,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, ClusterError> {
        let mut cmd = Command::new(&self.kubectl_path);
        if let Some(ctx) = &self.context {
            cmd.arg("--context").arg(ctx);
        }
        cmd.args(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!("kubectl {}", args.join(" "));

        let output = if let Some(input) = stdin {
            cmd.stdin(Stdio::piped());
            let mut child = cmd.spawn()?;
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
            }
            child.wait_with_output().await?
        } else {
            cmd.output().await?
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let command = format!("{} {}", self.kubectl_path, args.join(" "));
            if is_unreachable(&stderr) {
                Err(ClusterError::Unreachable(stderr.trim().to_string()))
            } else {
                Err(ClusterError::CommandFailed {
                    command,
                    stderr: stderr.trim().to_string(),
                })
            }
        }
    }
}

/// Connection-level failures mean the control plane itself is down, which
/// invalidates every scenario result.
fn is_unreachable(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("unable to connect to the server")
        || msg.contains("connection refused")
        || msg.contains("no such host")
        || msg.contains("was refused")
}

#[async_trait]
impl ClusterApi for KubectlClient {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, ClusterError> {
        let mut args = vec!["get", "pods", "-n", namespace, "-o", "json"];
        if !selector.is_empty() {
            args.push("-l");
            args.push(selector);
        }
        let json = self.run(&args).await?;
        parse_pod_list(&json)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), ClusterError> {
        let mut args = vec!["delete", "pod", name, "-n", namespace, "--wait=false"];
        if force {
            args.push("--force");
            args.push("--grace-period=0");
        }
        self.run(&args).await?;
        Ok(())
    }

    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> Result<String, ClusterError> {
        let mut args = vec!["exec", "-n", namespace, pod, "--"];
        args.extend_from_slice(command);
        self.run(&args).await
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let json = self.run(&["get", "nodes", "-o", "json"]).await?;
        parse_node_list(&json)
    }

    async fn cordon_node(&self, name: &str) -> Result<(), ClusterError> {
        self.run(&["cordon", name]).await?;
        Ok(())
    }

    async fn drain_node(&self, name: &str) -> Result<(), ClusterError> {
        self.run(&[
            "drain",
            name,
            "--ignore-daemonsets",
            "--delete-emptydir-data",
            "--force",
            "--timeout=180s",
        ])
        .await?;
        Ok(())
    }

    async fn uncordon_node(&self, name: &str) -> Result<(), ClusterError> {
        self.run(&["uncordon", name]).await?;
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<(), ClusterError> {
        self.run_with_stdin(&["apply", "-f", "-"], Some(manifest))
            .await?;
        Ok(())
    }

    async fn delete_network_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.run(&[
            "delete",
            "networkpolicy",
            name,
            "-n",
            namespace,
            "--ignore-not-found",
        ])
        .await?;
        Ok(())
    }

    async fn hpa_status(&self, namespace: &str, name: &str) -> Result<HpaStatus, ClusterError> {
        let json = self
            .run(&["get", "hpa", name, "-n", namespace, "-o", "json"])
            .await?;
        parse_hpa(&json)
    }
}

// ---------------------------------------------------------------------------
// Typed parsing of kubectl JSON output
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: Metadata,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatusObject,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    node_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatusObject {
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "podIP")]
    pod_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Condition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct NodeObject {
    metadata: Metadata,
    #[serde(default)]
    spec: NodeSpec,
    #[serde(default)]
    status: NodeStatusObject,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSpec {
    #[serde(default)]
    unschedulable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatusObject {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct HpaObject {
    metadata: Metadata,
    spec: HpaSpec,
    #[serde(default)]
    status: HpaStatusObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HpaSpec {
    min_replicas: Option<u32>,
    max_replicas: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HpaStatusObject {
    #[serde(default)]
    current_replicas: u32,
    #[serde(default)]
    desired_replicas: u32,
    #[serde(default)]
    current_metrics: Vec<HpaMetric>,
}

#[derive(Debug, Deserialize)]
struct HpaMetric {
    resource: Option<ResourceMetric>,
}

#[derive(Debug, Deserialize)]
struct ResourceMetric {
    name: String,
    current: MetricValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricValue {
    average_utilization: Option<u32>,
}

fn has_ready_condition(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.condition_type == "Ready" && c.status == "True")
}

pub(crate) fn parse_pod_list(json: &str) -> Result<Vec<PodInfo>, ClusterError> {
    let list: ObjectList<PodObject> =
        serde_json::from_str(json).map_err(|e| ClusterError::Parse(e.to_string()))?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| PodInfo {
            name: pod.metadata.name,
            namespace: pod.metadata.namespace,
            labels: pod.metadata.labels,
            phase: pod
                .status
                .phase
                .as_deref()
                .map(PodPhase::parse)
                .unwrap_or(PodPhase::Unknown),
            ready: has_ready_condition(&pod.status.conditions),
            node_name: pod.spec.node_name,
            started_at: pod.status.start_time,
            pod_ip: pod.status.pod_ip,
        })
        .collect())
}

pub(crate) fn parse_node_list(json: &str) -> Result<Vec<NodeInfo>, ClusterError> {
    let list: ObjectList<NodeObject> =
        serde_json::from_str(json).map_err(|e| ClusterError::Parse(e.to_string()))?;
    Ok(list
        .items
        .into_iter()
        .map(|node| NodeInfo {
            name: node.metadata.name,
            ready: has_ready_condition(&node.status.conditions),
            unschedulable: node.spec.unschedulable,
        })
        .collect())
}

pub(crate) fn parse_hpa(json: &str) -> Result<HpaStatus, ClusterError> {
    let hpa: HpaObject =
        serde_json::from_str(json).map_err(|e| ClusterError::Parse(e.to_string()))?;
    let cpu_percent = hpa
        .status
        .current_metrics
        .iter()
        .filter_map(|m| m.resource.as_ref())
        .find(|r| r.name == "cpu")
        .and_then(|r| r.current.average_utilization);
    Ok(HpaStatus {
        name: hpa.metadata.name,
        min_replicas: hpa.spec.min_replicas.unwrap_or(1),
        max_replicas: hpa.spec.max_replicas,
        current_replicas: hpa.status.current_replicas,
        desired_replicas: hpa.status.desired_replicas,
        cpu_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_LIST_JSON: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "metadata": {
                    "name": "db-cluster-0",
                    "namespace": "prod",
                    "labels": {"application": "spilo", "spilo-role": "master"}
                },
                "spec": {"nodeName": "worker-1"},
                "status": {
                    "phase": "Running",
                    "startTime": "2026-08-30T10:00:00Z",
                    "podIP": "10.42.0.17",
                    "conditions": [
                        {"type": "PodScheduled", "status": "True"},
                        {"type": "Ready", "status": "True"}
                    ]
                }
            },
            {
                "metadata": {
                    "name": "db-cluster-1",
                    "namespace": "prod",
                    "labels": {"application": "spilo", "spilo-role": "replica"}
                },
                "spec": {"nodeName": "worker-2"},
                "status": {
                    "phase": "Pending",
                    "conditions": [{"type": "Ready", "status": "False"}]
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_pod_list() {
        let pods = parse_pod_list(POD_LIST_JSON).unwrap();
        assert_eq!(pods.len(), 2);

        let master = &pods[0];
        assert_eq!(master.name, "db-cluster-0");
        assert_eq!(master.labels.get("spilo-role").unwrap(), "master");
        assert_eq!(master.phase, PodPhase::Running);
        assert!(master.ready);
        assert_eq!(master.node_name.as_deref(), Some("worker-1"));
        assert_eq!(master.pod_ip.as_deref(), Some("10.42.0.17"));
        assert!(master.started_at.is_some());

        let replica = &pods[1];
        assert_eq!(replica.phase, PodPhase::Pending);
        assert!(!replica.ready);
    }

    #[test]
    fn test_parse_empty_pod_list() {
        let pods = parse_pod_list(r#"{"items": []}"#).unwrap();
        assert!(pods.is_empty());
    }

    #[test]
    fn test_parse_pod_list_rejects_garbage() {
        assert!(parse_pod_list("NAME READY STATUS").is_err());
    }

    #[test]
    fn test_parse_node_list() {
        let json = r#"{
            "items": [
                {
                    "metadata": {"name": "worker-1"},
                    "spec": {"unschedulable": true},
                    "status": {"conditions": [{"type": "Ready", "status": "True"}]}
                },
                {
                    "metadata": {"name": "worker-2"},
                    "spec": {},
                    "status": {"conditions": [{"type": "Ready", "status": "True"}]}
                }
            ]
        }"#;
        let nodes = parse_node_list(json).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].unschedulable);
        assert!(!nodes[1].unschedulable);
        assert!(nodes[1].ready);
    }

    #[test]
    fn test_parse_hpa() {
        let json = r#"{
            "metadata": {"name": "web"},
            "spec": {"minReplicas": 2, "maxReplicas": 10},
            "status": {
                "currentReplicas": 4,
                "desiredReplicas": 6,
                "currentMetrics": [
                    {"resource": {"name": "cpu", "current": {"averageUtilization": 83}}}
                ]
            }
        }"#;
        let hpa = parse_hpa(json).unwrap();
        assert_eq!(hpa.min_replicas, 2);
        assert_eq!(hpa.max_replicas, 10);
        assert_eq!(hpa.current_replicas, 4);
        assert_eq!(hpa.desired_replicas, 6);
        assert_eq!(hpa.cpu_percent, Some(83));
    }

    #[test]
    fn test_parse_hpa_without_metrics() {
        let json = r#"{
            "metadata": {"name": "web"},
            "spec": {"maxReplicas": 10},
            "status": {"currentReplicas": 2, "desiredReplicas": 2}
        }"#;
        let hpa = parse_hpa(json).unwrap();
        assert_eq!(hpa.min_replicas, 1);
        assert_eq!(hpa.cpu_percent, None);
    }

    #[test]
    fn test_unreachable_detection() {
        assert!(is_unreachable(
            "The connection to the server 127.0.0.1:6443 was refused - did you specify the right host or port?"
        ));
        assert!(is_unreachable("Unable to connect to the server: dial tcp: lookup cluster: no such host"));
        assert!(!is_unreachable("Error from server (NotFound): pods \"web-0\" not found"));
    }
}
