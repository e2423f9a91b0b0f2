//! viewsync simulator
//!
//! Starts a group of in-process nodes, runs one leave scenario against it and
//! prints the view every node ends up with.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use colored::*;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use viewsync::error::{GmsError, GmsResult};
use viewsync::sim::{LocalCluster, NodeReport};
use viewsync::GmsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Scenario {
    /// A participant leaves
    ParticipantLeave,
    /// The coordinator leaves
    CoordLeave,
    /// The first half of the members leave one after the other
    SequentialCoordLeaves,
    /// The first `--leavers` members leave at the same time
    ConcurrentLeaves,
    /// The coordinator crashes and the failure detector excludes it
    CoordCrash,
}

#[derive(Parser)]
#[command(
    name = "viewsync-sim",
    version,
    about = "Run group membership leave scenarios on an in-process cluster"
)]
struct Cli {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value_t = Scenario::CoordLeave)]
    scenario: Scenario,

    /// Number of nodes to start
    #[arg(short, long, default_value_t = 4)]
    nodes: usize,

    /// Number of members leaving in the concurrent-leaves scenario
    #[arg(long, default_value_t = 2)]
    leavers: usize,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to wait for the survivors to agree on a view
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize)]
struct Summary {
    scenario: Scenario,
    converged: bool,
    elapsed_ms: u128,
    left: Vec<(String, bool)>,
    nodes: Vec<NodeReport>,
}

fn main() -> GmsResult<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();

    let config = match &cli.config {
        Some(path) => GmsConfig::from_file(path)?,
        None => GmsConfig::default(),
    };
    check_args(&cli)?;

    let mut cluster = LocalCluster::new(config);
    let members = cluster.start(cli.nodes)?;
    if !cluster.wait_until_same_view(Duration::from_millis(cli.timeout_ms)) {
        return Err(GmsError::Timeout {
            elapsed: Duration::from_millis(cli.timeout_ms),
            what: "initial view",
        });
    }
    info!(scenario = ?cli.scenario, nodes = cli.nodes, "cluster ready");

    let start = Instant::now();
    let left = run_scenario(&mut cluster, cli.scenario, &members, cli.leavers);
    let converged = cluster.stabilize(Duration::from_millis(cli.timeout_ms));
    let summary = Summary {
        scenario: cli.scenario,
        converged,
        elapsed_ms: start.elapsed().as_millis(),
        left: left
            .into_iter()
            .map(|(addr, ok)| (addr.to_string(), ok))
            .collect(),
        nodes: cluster.report(),
    };

    if cli.json {
        let text = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        println!("{}", text);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn check_args(cli: &Cli) -> GmsResult<()> {
    if cli.nodes < 2 {
        return Err(GmsError::Config("at least 2 nodes are needed".to_string()));
    }
    if cli.scenario == Scenario::ConcurrentLeaves && (cli.leavers == 0 || cli.leavers >= cli.nodes) {
        return Err(GmsError::Config(format!(
            "leavers must be between 1 and {}",
            cli.nodes - 1
        )));
    }
    Ok(())
}

fn run_scenario(
    cluster: &mut LocalCluster,
    scenario: Scenario,
    members: &[viewsync::Address],
    leavers: usize,
) -> Vec<(viewsync::Address, bool)> {
    match scenario {
        Scenario::ParticipantLeave => {
            let leaver = members[members.len() - 1];
            vec![(leaver, cluster.disconnect(leaver))]
        }
        Scenario::CoordLeave => {
            let leaver = members[0];
            vec![(leaver, cluster.disconnect(leaver))]
        }
        Scenario::SequentialCoordLeaves => members[..members.len() / 2]
            .iter()
            .map(|leaver| (*leaver, cluster.disconnect(*leaver)))
            .collect(),
        Scenario::ConcurrentLeaves => cluster.disconnect_concurrently(&members[..leavers]),
        Scenario::CoordCrash => {
            cluster.crash(members[0]);
            Vec::new()
        }
    }
}

fn print_summary(summary: &Summary) {
    let outcome = if summary.converged {
        "converged".bright_green()
    } else {
        "did not converge".bright_red()
    };
    println!(
        "{} {:?} {} in {}ms",
        "→".bright_blue(),
        summary.scenario,
        outcome,
        summary.elapsed_ms
    );
    for (addr, ok) in &summary.left {
        let status = if *ok { "ok".green() } else { "failed".yellow() };
        println!("  leave {}: {}", addr.bright_cyan(), status);
    }
    for node in &summary.nodes {
        let view = node
            .view
            .as_ref()
            .map_or_else(|| "no view".dimmed().to_string(), |view| view.to_string());
        println!("  {} {:<11} {}", node.address.to_string().bright_cyan(), node.role.to_string(), view);
    }
}
