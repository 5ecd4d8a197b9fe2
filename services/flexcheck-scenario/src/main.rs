use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flexcheck_core::HarnessConfig;
use flexcheck_scenario::{Collaborators, ScenarioOrchestrator, CONFIG_TEMPLATE};
use flexcheck_sim::{FaultPlan, SimConfig, SimWorkloadConfig, SimulatedCluster};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "flexcheck")]
#[command(about = "Cluster elasticity verification harness", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the expand/shrink scenario against an in-process simulated cluster
    Simulate {
        /// Configuration file (defaults to ./config/flexcheck or FLEXCHECK_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tablet servers before expansion
        #[arg(long)]
        tablet_servers: Option<usize>,

        /// Failure detector timeout of the simulated masters
        #[arg(long)]
        heartbeat_timeout_ms: Option<u64>,

        /// Time the simulated blacklist move takes to reach 100%
        #[arg(long)]
        move_duration_ms: Option<u64>,

        /// Make the workload fail after this many ops
        #[arg(long)]
        fail_workload_after_ops: Option<i64>,

        /// Reject the blacklist submission
        #[arg(long, default_value = "false")]
        reject_blacklist: bool,

        /// Drop a non-blacklisted tablet server half way through the move
        #[arg(long, default_value = "false")]
        drop_node_during_move: bool,

        /// Cap move completion at this percentage
        #[arg(long)]
        stall_move_at: Option<f64>,

        /// Write the JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Generate a configuration file template
    GenerateConfig {
        /// Output configuration file path
        #[arg(long, default_value = "flexcheck.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            tablet_servers,
            heartbeat_timeout_ms,
            move_duration_ms,
            fail_workload_after_ops,
            reject_blacklist,
            drop_node_during_move,
            stall_move_at,
            report,
        } => {
            let mut harness = match config {
                Some(path) => HarnessConfig::from_file(path)?,
                None => HarnessConfig::load()?,
            };
            if let Some(n) = tablet_servers {
                harness.cluster.num_tablet_servers = n;
            }
            if let Some(ms) = heartbeat_timeout_ms {
                harness.cluster.heartbeat_timeout_ms = ms;
            }

            let mut sim = SimConfig::from_harness(&harness).with_faults(FaultPlan {
                reject_blacklist,
                drop_node_during_move,
                stall_move_at,
                unreachable_fetches: 0,
            });
            if let Some(ms) = move_duration_ms {
                sim.move_duration = std::time::Duration::from_millis(ms);
            }
            let workload = SimWorkloadConfig {
                fail_after_ops: fail_workload_after_ops,
                ..SimWorkloadConfig::default()
            };

            let cluster = Arc::new(SimulatedCluster::new(sim));
            let orchestrator =
                ScenarioOrchestrator::new(harness, Collaborators::simulated(cluster, workload))?;
            let outcome = orchestrator.run().await;

            if let Some(path) = report {
                std::fs::write(&path, outcome.to_json()?)?;
                info!(path = %path.display(), "Report written");
            }

            if let Err(failure) = outcome.into_result() {
                error!("{}", failure);
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::GenerateConfig { output } => {
            std::fs::write(&output, CONFIG_TEMPLATE)?;
            println!("Configuration template written to: {}", output.display());
            println!("\nUse it with:");
            println!("  flexcheck simulate --config {}", output.display());
            Ok(())
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
