// Faultline - Main Entry Point
//
// Drives the resilience-validation suite: builds the fault scenarios from
// configuration, runs them sequentially through the orchestrator while the
// load/autoscale phase runs as a concurrent task, and emits the report.
//
// Exit codes: 0 all scenarios passed, 1 at least one failed, 2 the run
// itself could not complete (control plane unreachable).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use faultline::cluster::kubectl::KubectlClient;
use faultline::cluster::ClusterApi;
use faultline::config::Config;
use faultline::fault::{
    CachePrimaryFault, DatabasePrimaryFault, NetworkPartitionFault, NodeDrainFault,
    ReplicaPoolFault,
};
use faultline::integrity::CacheKeyProbe;
use faultline::loadtest::run_load_test;
use faultline::scenario::{Orchestrator, RunOutcome, Scenario};

/// Faultline: resilience validation for Kubernetes application stacks
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version = "0.1.0")]
#[command(about = "Fault injection, recovery SLA measurement and autoscale load testing", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include the node-drain scenario even when disabled in configuration
    #[arg(long)]
    include_node_faults: bool,

    /// Skip the load/autoscale phase even when enabled in configuration
    #[arg(long)]
    skip_load: bool,

    /// Override the report output directory
    #[arg(long)]
    report_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run only the fault scenarios, never the load phase
    Chaos,
    /// Run only the load/autoscale phase
    Load,
}

fn init_tracing(args: &Args, config: &Config) -> Result<()> {
    let level = if args.verbose {
        Level::DEBUG.to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid log level '{}'", level))?,
        )
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Assemble the scenario list from configuration.
fn build_scenarios(args: &Args, config: &Config, cluster: &Arc<dyn ClusterApi>) -> Vec<Scenario> {
    let ns = config.cluster.namespace.clone();
    let mut scenarios = Vec::new();

    scenarios.push(Scenario::new(
        "database-primary",
        Box::new(DatabasePrimaryFault::new(
            Arc::clone(cluster),
            ns.clone(),
            config.database.clone(),
        )),
        Duration::from_secs(config.database.timeout_secs),
        Duration::from_secs(config.database.sla_secs),
    ));

    scenarios.push(
        Scenario::new(
            "cache-primary",
            Box::new(CachePrimaryFault::new(
                Arc::clone(cluster),
                ns.clone(),
                config.cache.clone(),
            )),
            Duration::from_secs(config.cache.timeout_secs),
            Duration::from_secs(config.cache.sla_secs),
        )
        .with_integrity(Box::new(CacheKeyProbe::new(
            Arc::clone(cluster),
            ns.clone(),
            config.cache.clone(),
        ))),
    );

    scenarios.push(Scenario::new(
        "app-replicas",
        Box::new(ReplicaPoolFault::new(
            Arc::clone(cluster),
            ns.clone(),
            config.replicas.clone(),
        )),
        Duration::from_secs(config.replicas.timeout_secs),
        Duration::from_secs(config.replicas.sla_secs),
    ));

    if let Some(workers) = &config.workers {
        scenarios.push(Scenario::new(
            "worker-replicas",
            Box::new(ReplicaPoolFault::new(
                Arc::clone(cluster),
                ns.clone(),
                workers.clone(),
            )),
            Duration::from_secs(workers.timeout_secs),
            Duration::from_secs(workers.sla_secs),
        ));
    }

    if config.node.enabled || args.include_node_faults {
        scenarios.push(Scenario::new(
            "node-drain",
            Box::new(NodeDrainFault::new(
                Arc::clone(cluster),
                ns.clone(),
                config.node.clone(),
            )),
            Duration::from_secs(config.node.timeout_secs),
            Duration::from_secs(config.node.sla_secs),
        ));
    } else {
        info!("node-drain disabled; pass --include-node-faults to run it");
    }

    scenarios.push(Scenario::new(
        "network-partition",
        Box::new(NetworkPartitionFault::new(
            Arc::clone(cluster),
            ns,
            config.network.clone(),
        )),
        Duration::from_secs(config.network.timeout_secs),
        Duration::from_secs(config.network.sla_secs),
    ));

    scenarios
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &args.report_dir {
        config.report.output_dir = dir.display().to_string();
    }
    config.validate()?;

    init_tracing(&args, &config)?;
    info!("faultline starting against namespace '{}'", config.cluster.namespace);

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubectlClient::new(
        config.cluster.kubectl_path.clone(),
        config.cluster.context.clone(),
    ));

    // Preflight: a run against an unreachable control plane would produce
    // nothing but noise.
    if let Err(err) = cluster.list_nodes().await {
        error!("control plane preflight failed: {}", err);
        std::process::exit(2);
    }

    let run_chaos = !matches!(args.command, Some(Commands::Load));
    let run_load = match args.command {
        Some(Commands::Chaos) => false,
        // An explicit `load` invocation runs the phase even when the config
        // leaves it disabled for suite runs.
        Some(Commands::Load) => true,
        None => config.load.enabled && !args.skip_load,
    };

    // The load phase runs alongside the fault scenarios so the autoscaler
    // is observed under the same conditions the application would face.
    let load_handle = if run_load {
        let cluster = Arc::clone(&cluster);
        let namespace = config.cluster.namespace.clone();
        let load_config = config.load.clone();
        Some(tokio::spawn(async move {
            run_load_test(cluster.as_ref(), &namespace, &load_config).await
        }))
    } else {
        None
    };

    let mut outcome = if run_chaos {
        let scenarios = build_scenarios(&args, &config, &cluster);
        let mut orchestrator = Orchestrator::new(
            scenarios,
            config.run.poll_interval(),
            config.run.cooldown(),
        );
        if let Some(deadline) = config.run.global_deadline() {
            orchestrator = orchestrator.with_global_deadline(deadline);
        }
        orchestrator.run().await
    } else {
        RunOutcome {
            report: faultline::report::RunReport::new(),
            fatal: None,
        }
    };

    if let Some(handle) = load_handle {
        match handle.await {
            Ok(Ok(summary)) => outcome.report.load_test = Some(summary),
            Ok(Err(err)) => warn!("load test did not complete: {}", err),
            Err(err) => warn!("load task exited abnormally: {}", err),
        }
        outcome.report.finish();
    }

    println!("{}", outcome.report.to_markdown());

    let report_dir = PathBuf::from(&config.report.output_dir);
    match outcome.report.save_json(&report_dir) {
        Ok(path) => info!("report written to {}", path.display()),
        Err(err) => warn!("could not write report artifact: {}", err),
    }

    if let Some(fatal) = &outcome.fatal {
        error!("run aborted: {}", fatal);
    }
    std::process::exit(outcome.exit_code());
}
