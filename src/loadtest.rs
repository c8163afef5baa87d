// Load Generator & Autoscale Monitor
//
// Drives sustained HTTP traffic at the application tier while sampling the
// HorizontalPodAutoscaler, then watches the scale-down side after load stops.
// Replicas dropping before the stabilization window has elapsed is reported
// as a configuration anomaly: it usually means the HPA's stabilization
// settings do not match what operators believe is deployed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::cluster::{ClusterApi, HpaStatus};
use crate::config::LoadTestConfig;

/// What the load phase and the autoscaler did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestSummary {
    pub requests_sent: u64,
    pub requests_ok: u64,
    pub requests_failed: u64,
    /// Highest replica count observed under load.
    pub max_replicas_seen: u32,
    /// Seconds from load start until the HPA's upper bound was reached, if
    /// it ever was.
    pub secs_to_max_replicas: Option<f64>,
    /// Highest CPU utilisation the HPA reported, as a percentage of target.
    pub peak_cpu_percent: Option<u32>,
    /// Whether replicas returned to the HPA minimum within the watch window.
    pub scaled_down: bool,
    /// Replicas dropped before the stabilization window elapsed.
    pub early_scaledown_anomaly: bool,
}

impl LoadTestSummary {
    pub fn error_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        self.requests_failed as f64 / self.requests_sent as f64
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "- requests: {} sent, {} ok, {} failed ({:.2}% errors)",
            self.requests_sent,
            self.requests_ok,
            self.requests_failed,
            self.error_rate() * 100.0
        );
        let _ = writeln!(out, "- peak replicas: {}", self.max_replicas_seen);
        match self.secs_to_max_replicas {
            Some(secs) => {
                let _ = writeln!(out, "- time to max replicas: {:.0}s", secs);
            }
            None => {
                let _ = writeln!(out, "- autoscaler never reached its upper bound");
            }
        }
        if let Some(cpu) = self.peak_cpu_percent {
            let _ = writeln!(out, "- peak CPU: {}%", cpu);
        }
        if self.early_scaledown_anomaly {
            let _ = writeln!(
                out,
                "- ANOMALY: replicas dropped before the stabilization window elapsed"
            );
        }
        let _ = writeln!(
            out,
            "- scale-down: {}",
            if self.scaled_down {
                "returned to minimum"
            } else {
                "still in progress when the watch window closed"
            }
        );
        out
    }
}

/// Shared counters the request workers increment.
#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
}

/// Fire requests at `target_url` from `concurrency` workers until `deadline`.
async fn generate_load(
    config: &LoadTestConfig,
    deadline: Instant,
    counters: Arc<Counters>,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let mut workers = Vec::with_capacity(config.concurrency);
    for _ in 0..config.concurrency {
        let client = client.clone();
        let url = config.target_url.clone();
        let counters = Arc::clone(&counters);
        workers.push(tokio::spawn(async move {
            while Instant::now() < deadline {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                match client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        counters.ok.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) | Err(_) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }
    join_workers(workers).await;
    Ok(())
}

/// Wait for every request worker; a panicked worker is logged rather than
/// silently dropped, since its counters stop at whatever they last recorded.
async fn join_workers(workers: Vec<tokio::task::JoinHandle<()>>) {
    for worker in workers {
        if let Err(err) = worker.await {
            warn!("load worker exited abnormally: {}", err);
        }
    }
}

/// Tracks HPA behaviour across the load and post-load phases.
struct AutoscaleMonitor<'a> {
    cluster: &'a dyn ClusterApi,
    namespace: &'a str,
    config: &'a LoadTestConfig,
    max_replicas_seen: u32,
    secs_to_max_replicas: Option<f64>,
    peak_cpu_percent: Option<u32>,
}

impl<'a> AutoscaleMonitor<'a> {
    fn new(cluster: &'a dyn ClusterApi, namespace: &'a str, config: &'a LoadTestConfig) -> Self {
        Self {
            cluster,
            namespace,
            config,
            max_replicas_seen: 0,
            secs_to_max_replicas: None,
            peak_cpu_percent: None,
        }
    }

    async fn sample(&mut self) -> Option<HpaStatus> {
        match self
            .cluster
            .hpa_status(self.namespace, &self.config.hpa_name)
            .await
        {
            Ok(status) => Some(status),
            Err(err) => {
                warn!("hpa sample failed: {}", err);
                None
            }
        }
    }

    fn observe(&mut self, status: &HpaStatus, load_started: Instant) {
        self.max_replicas_seen = self.max_replicas_seen.max(status.current_replicas);
        if let Some(cpu) = status.cpu_percent {
            self.peak_cpu_percent = Some(self.peak_cpu_percent.map_or(cpu, |p| p.max(cpu)));
        }
        if self.secs_to_max_replicas.is_none() && status.current_replicas >= status.max_replicas {
            let secs = load_started.elapsed().as_secs_f64();
            info!("autoscaler reached its upper bound after {:.0}s", secs);
            self.secs_to_max_replicas = Some(secs);
        }
    }

    /// Sample during the load phase until `deadline`.
    async fn watch_under_load(&mut self, load_started: Instant, deadline: Instant) {
        let interval = Duration::from_secs(self.config.sample_interval_secs);
        while Instant::now() < deadline {
            if let Some(status) = self.sample().await {
                self.observe(&status, load_started);
            }
            sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// Post-load: first confirm replicas hold through the stabilization
    /// window, then wait for the return to minimum.
    async fn watch_scaledown(&mut self, load_started: Instant) -> (bool, bool) {
        let interval = Duration::from_secs(self.config.sample_interval_secs);
        let plateau = self.max_replicas_seen;
        let mut early_anomaly = false;

        let stabilization_deadline =
            Instant::now() + Duration::from_secs(self.config.stabilization_window_secs);
        while Instant::now() < stabilization_deadline {
            if let Some(status) = self.sample().await {
                self.observe(&status, load_started);
                if status.current_replicas < plateau && !early_anomaly {
                    warn!(
                        "replicas dropped to {} inside the stabilization window",
                        status.current_replicas
                    );
                    early_anomaly = true;
                }
            }
            sleep(interval).await;
        }

        let scaledown_deadline =
            Instant::now() + Duration::from_secs(self.config.scaledown_window_secs);
        while Instant::now() < scaledown_deadline {
            if let Some(status) = self.sample().await {
                self.observe(&status, load_started);
                if status.current_replicas <= status.min_replicas {
                    return (true, early_anomaly);
                }
            }
            sleep(interval).await;
        }
        (false, early_anomaly)
    }
}

/// Full load-and-observe cycle: traffic plus HPA sampling, then the
/// scale-down watch.
pub async fn run_load_test(
    cluster: &dyn ClusterApi,
    namespace: &str,
    config: &LoadTestConfig,
) -> Result<LoadTestSummary> {
    info!(
        "starting load: {} workers against {} for {}s",
        config.concurrency, config.target_url, config.duration_secs
    );

    let counters = Arc::new(Counters::default());
    let load_started = Instant::now();
    let deadline = load_started + Duration::from_secs(config.duration_secs);

    let mut monitor = AutoscaleMonitor::new(cluster, namespace, config);
    let generator = generate_load(config, deadline, Arc::clone(&counters));
    let watcher = monitor.watch_under_load(load_started, deadline);
    let (gen_result, ()) = tokio::join!(generator, watcher);
    gen_result?;

    info!("load finished, watching autoscaler stabilization and scale-down");
    let (scaled_down, early_scaledown_anomaly) = monitor.watch_scaledown(load_started).await;

    Ok(LoadTestSummary {
        requests_sent: counters.sent.load(Ordering::Relaxed),
        requests_ok: counters.ok.load(Ordering::Relaxed),
        requests_failed: counters.failed.load(Ordering::Relaxed),
        max_replicas_seen: monitor.max_replicas_seen,
        secs_to_max_replicas: monitor.secs_to_max_replicas,
        peak_cpu_percent: monitor.peak_cpu_percent,
        scaled_down,
        early_scaledown_anomaly,
    })
}
