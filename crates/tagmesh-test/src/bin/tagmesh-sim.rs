//! TagMesh simulator
//!
//! Runs a cluster of simulated nodes on a shared radio medium in real time
//! (or as fast as possible with `--fast`) and logs their status reports.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tagmesh_runtime::{init_logging, LoggingConfig, Role};
use tagmesh_test::{LinkConfig, NodeSpec, ScenarioBuilder, Topology};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Layout {
    Full,
    Line,
    Ring,
}

impl From<Layout> for Topology {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Full => Topology::FullMesh,
            Layout::Line => Topology::Line,
            Layout::Ring => Topology::Ring,
        }
    }
}

/// Simulated TagMesh cluster: node 1 is the controller, the rest are targets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of nodes
    #[arg(short, long, default_value = "2")]
    nodes: u32,

    /// Simulated run time in seconds
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Each target's clock starts this far ahead of the previous node (ms)
    #[arg(short, long, default_value = "3000")]
    skew: u64,

    /// Probability a frame is lost on a link
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Radio layout
    #[arg(long, value_enum, default_value = "full")]
    layout: Layout,

    /// Seed for link loss
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Simulation step (ms)
    #[arg(long, default_value = "10")]
    step: u64,

    /// Do not pace steps to wall-clock time
    #[arg(long)]
    fast: bool,

    /// Log filter (trace, debug, info, warn, error or a directive)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logging(&LoggingConfig {
        level: args.log_level.clone(),
        json: args.json,
        with_target: false,
    })?;

    if !(0.0..=1.0).contains(&args.loss) {
        return Err(format!("--loss must be within 0.0..=1.0, got {}", args.loss).into());
    }

    let builder = (1..=args.nodes.max(1)).fold(ScenarioBuilder::new(), |builder, id| {
        let role = if id == 1 { Role::Controller } else { Role::Target };
        let start = u64::from(id - 1) * args.skew;
        builder.node(NodeSpec::new(id, role).starting_at(start))
    });
    let mut cluster = builder
        .topology(args.layout.into())
        .link(LinkConfig {
            loss_rate: args.loss,
            duplicate_rate: 0.0,
        })
        .seed(args.seed)
        .step(Duration::from_millis(args.step))
        .build()?;

    info!(
        nodes = args.nodes,
        layout = ?args.layout,
        skew_ms = args.skew,
        "simulation starting"
    );

    let total = Duration::from_secs(args.duration);
    let mut ticker = interval(Duration::from_millis(args.step.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while cluster.elapsed() < total {
        if !args.fast {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
            }
        }
        cluster.step();
    }

    let skew = cluster.max_skew();
    for node in cluster.nodes() {
        info!(
            node = %node.id(),
            role = %node.role(),
            peers = node.peer_count(),
            offset_ms = node.clock_offset(),
            relayed = node.router_stats().relayed,
            duplicates = node.router_stats().duplicates,
            "node summary"
        );
    }
    let medium = cluster.medium().stats();
    info!(
        elapsed_ms = cluster.elapsed().as_millis() as u64,
        max_skew_ms = skew,
        transmitted = medium.transmitted,
        lost = medium.lost,
        errors = cluster.errors().len(),
        "simulation finished"
    );

    Ok(())
}
