// MinerID Reorg Runner
//
// Runs a fork/reorg scenario against the in-process simulated network or
// against running nodes over JSON-RPC.
//
// Usage:
//   minerid-reorg
//   minerid-reorg --scenario my_plan.yaml --config harness.yaml
//   minerid-reorg --backend rpc \
//       --rpc-url http://127.0.0.1:18332 --rpc-url http://127.0.0.1:18333 \
//       --p2p-address 127.0.0.1:18444 --p2p-address 127.0.0.1:18445 \
//       --datadir /tmp/node0 --datadir /tmp/node1

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use minerid_testing_framework::{
    config::HarnessConfig,
    error::ErrorKind,
    node::{JsonRpcNode, NodeRpc, RpcEndpoint},
    orchestrator::{Clock, SystemClock},
    scenarios::{default_scenario, parse_scenario, ScenarioExecutor},
    sim::SimNetwork,
    utilities::storage::create_temp_datadir,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process simulated nodes
    Sim,
    /// Running nodes reached over JSON-RPC
    Rpc,
}

#[derive(Parser, Debug)]
#[command(name = "minerid-reorg")]
#[command(about = "Run a miner-info fork/reorg scenario")]
struct Args {
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    backend: Backend,

    /// Harness configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario plan (YAML); the built-in reorg scenario when omitted
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// RPC URL of each node, in participant order
    #[arg(long = "rpc-url")]
    rpc_urls: Vec<String>,

    #[arg(long, default_value = "")]
    rpc_user: String,

    #[arg(long, default_value = "")]
    rpc_password: String,

    /// P2P address of each node, in participant order
    #[arg(long = "p2p-address")]
    p2p_addresses: Vec<String>,

    /// Data directory of each node, where funding records are written
    #[arg(long = "datadir")]
    datadirs: Vec<PathBuf>,

    /// Write a failure artifact here (overrides the configuration)
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Print the execution report as JSON on success
    #[arg(long)]
    json: bool,
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Harness => 1,
        ErrorKind::Timeout => 2,
        ErrorKind::Rejection => 3,
        ErrorKind::InvariantViolation => 4,
    }
}

fn rpc_nodes(args: &Args) -> Result<Vec<(Arc<dyn NodeRpc>, PathBuf)>> {
    let count = args.rpc_urls.len();
    if count == 0 {
        bail!("--backend rpc needs at least one --rpc-url");
    }
    if args.p2p_addresses.len() != count || args.datadirs.len() != count {
        bail!(
            "got {} --rpc-url, {} --p2p-address and {} --datadir; counts must match",
            count,
            args.p2p_addresses.len(),
            args.datadirs.len()
        );
    }

    let mut nodes = Vec::with_capacity(count);
    for (index, url) in args.rpc_urls.iter().enumerate() {
        let endpoint = RpcEndpoint {
            label: format!("node{}", index),
            url: url.clone(),
            user: args.rpc_user.clone(),
            password: args.rpc_password.clone(),
            p2p_address: args.p2p_addresses[index].clone(),
        };
        let node = JsonRpcNode::new(endpoint)
            .with_context(|| format!("Failed to set up RPC client for {}", url))?;
        nodes.push((Arc::new(node) as Arc<dyn NodeRpc>, args.datadirs[index].clone()));
    }
    Ok(nodes)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path).await?,
        None => HarnessConfig::default(),
    };
    if let Some(dir) = &args.artifacts_dir {
        config.artifacts_dir = Some(dir.clone());
    }

    let scenario = match &args.scenario {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read scenario {}", path.display()))?;
            parse_scenario(&yaml)?
        }
        None => default_scenario()?,
    };
    info!("Scenario: {} ({} steps)", scenario.name, scenario.steps.len());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    // keeps the simulated datadirs alive until the run ends
    let mut sim_root = None;
    let mut executor = match args.backend {
        Backend::Sim => {
            let root = create_temp_datadir().context("Failed to create sim datadir")?;
            let network = SimNetwork::builder()
                .with_nodes(scenario.participants)
                .with_config(config.sim.clone())
                .with_clock(clock.clone())
                .with_datadir_root(root.path())
                .build()?;
            info!("Simulated network with {} nodes under {}", scenario.participants, root.path().display());
            sim_root = Some(root);
            ScenarioExecutor::from_sim(config, clock, &network)?
        }
        Backend::Rpc => ScenarioExecutor::new(config, clock, rpc_nodes(&args)?)?,
    };

    let outcome = executor.execute(&scenario).await;
    drop(executor);
    drop(sim_root);

    match outcome {
        Ok(report) => {
            info!(
                "Scenario passed: {} steps, {} cycles",
                report.steps_executed,
                report.cycles.len()
            );
            for view in &report.final_views {
                info!("  {}", view);
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            error!("Scenario failed: {}", failure);
            Ok(ExitCode::from(exit_code(failure.kind())))
        }
    }
}
