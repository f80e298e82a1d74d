use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use bikeway_router::api::{run_server, AppState};
use bikeway_router::config::Config;
use bikeway_router::crime::CrimePointIndex;
use bikeway_router::graph::StreetGraph;
use bikeway_router::policy::{PolicyArtifact, WeightedHeuristicPolicy};
use bikeway_router::utils::{format_bytes, format_num};

/// Bicycle-friendly route planning server.
#[derive(Parser, Debug)]
struct Cli {
    /// Path to the gzip+bincode street graph. Overrides ROUTER_GRAPH_PATH.
    #[clap(short, long)]
    graph: Option<String>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });
    if let Some(graph_path) = cli.graph {
        config.graph_path = graph_path;
    }

    let startup = Instant::now();

    let graph_size = std::fs::metadata(&config.graph_path).map(|m| m.len()).unwrap_or(0);
    let graph = StreetGraph::open(&config.graph_path)?;
    log::debug!(
        "[{:6.1}s] loaded street graph ({}): {} nodes, {} edges",
        startup.elapsed().as_secs_f32(),
        format_bytes(graph_size),
        format_num(graph.node_count()),
        format_num(graph.edge_count())
    );

    let crime_index = match &config.crime_points_path {
        Some(path) => CrimePointIndex::load(path).unwrap_or_else(|e| {
            log::warn!("failed to load crime points from {path}: {e}");
            CrimePointIndex::new(Vec::new())
        }),
        None => CrimePointIndex::new(Vec::new()),
    };
    log::debug!(
        "[{:6.1}s] loaded {} crime points",
        startup.elapsed().as_secs_f32(),
        format_num(crime_index.len())
    );

    let artifact = match &config.policy_path {
        Some(path) => PolicyArtifact::load(path).unwrap_or_else(|e| {
            log::warn!("failed to load policy artifact from {path}: {e}, using defaults");
            PolicyArtifact::default()
        }),
        None => PolicyArtifact::default(),
    };
    let policy = WeightedHeuristicPolicy::new(artifact);

    let state = Arc::new(AppState {
        graph,
        crime_index,
        policy: Box::new(policy),
    });

    run_server(config, state).await
}
