use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use pose_graph_slam::core::AnchorPolicy;
use pose_graph_slam::init_logger;
use pose_graph_slam::io::{G2oLoader, GraphLoader, load_graph};
use pose_graph_slam::linalg::LinearSolverType;
use pose_graph_slam::observers::TrajectoryRecorder;
use pose_graph_slam::optimizer::{GaussNewton, GaussNewtonConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "optimize_2d_graph")]
#[command(about = "Optimize 2D pose graphs with landmarks from G2O files")]
struct Args {
    /// G2O file to load
    #[arg(default_value = "data/simulation.g2o")]
    input: PathBuf,

    /// Maximum number of Gauss-Newton iterations
    #[arg(short, long, default_value = "50")]
    max_iterations: usize,

    /// Convergence threshold on consecutive step norms
    #[arg(short, long, default_value = "1e-4")]
    tolerance: f64,

    /// Linear solver: "cholesky" or "qr"
    #[arg(short, long, default_value = "cholesky")]
    linear_solver: String,

    /// Pose id to anchor; defaults to the lowest pose id with a pose-pose edge
    #[arg(long)]
    anchor: Option<usize>,

    /// Report per-node standard deviations after optimization
    #[arg(long)]
    covariances: bool,

    /// Print the pose trajectory after every iteration
    #[arg(long)]
    trajectory: bool,

    /// Optional path to save the optimized graph (e.g., output/optimized.g2o)
    #[arg(long)]
    save_output: Option<PathBuf>,

    /// Enable per-iteration debug output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_linear_solver(name: &str) -> Result<LinearSolverType, String> {
    match name.to_lowercase().as_str() {
        "cholesky" | "llt" => Ok(LinearSolverType::SparseCholesky),
        "qr" => Ok(LinearSolverType::SparseQR),
        other => Err(format!(
            "Unknown linear solver: {other}. Valid options: cholesky, qr"
        )),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.verbose {
        pose_graph_slam::init_logger_with_level(tracing::Level::DEBUG);
    } else {
        init_logger();
    }

    let load_start = Instant::now();
    let mut graph = load_graph(&args.input)?;
    info!(
        "Loaded {:?}: {} poses, {} landmarks, {} edges in {:.2}ms",
        args.input,
        graph.poses().len(),
        graph.landmarks().len(),
        graph.edge_count(),
        load_start.elapsed().as_secs_f64() * 1000.0
    );

    let mut config = GaussNewtonConfig::new()
        .with_max_iterations(args.max_iterations)
        .with_step_norm_tolerance(args.tolerance)
        .with_linear_solver_type(parse_linear_solver(&args.linear_solver)?)
        .with_compute_covariances(args.covariances);
    if let Some(anchor) = args.anchor {
        config = config.with_anchor_policy(AnchorPolicy::Node(anchor));
    }

    let recorder = TrajectoryRecorder::new();
    recorder.record_initial(&graph)?;

    let mut solver = GaussNewton::with_config(config);
    solver.add_observer(recorder.clone());

    let result = match solver.optimize(&mut graph) {
        Ok(result) => result,
        Err(e) => {
            warn!("Optimization failed: {}", e.chain_compact());
            return Err(e.into());
        }
    };

    info!("Status: {}", result.status);
    for (iteration, (step_norm, cost)) in result.step_norms.iter().zip(&result.costs).enumerate() {
        info!(
            "iter {:>3}  |dx| = {:.6e}  cost = {:.6e}",
            iteration, step_norm, cost
        );
    }
    info!(
        "Cost: {:.6e} -> {:.6e} in {} iterations ({:.2}ms)",
        result.initial_cost,
        result.final_cost,
        result.iterations,
        result.elapsed_time.as_secs_f64() * 1000.0
    );

    if args.trajectory {
        for frame in recorder.frames()? {
            let label = frame
                .iteration
                .map_or_else(|| "initial".to_string(), |i| format!("iter {i}"));
            let points: Vec<String> = frame
                .poses
                .iter()
                .map(|(_, pose)| format!("({:.3}, {:.3})", pose.x, pose.y))
                .collect();
            info!("{}: {}", label, points.join(" "));
        }
    }

    if let Some(covariances) = &result.covariances {
        let mut ids: Vec<_> = covariances.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let cov = &covariances[&id];
            let std_devs: Vec<String> = (0..cov.nrows())
                .map(|i| format!("{:.4e}", cov[(i, i)].max(0.0).sqrt()))
                .collect();
            info!("node {:>5}  σ = [{}]", id, std_devs.join(", "));
        }
    }

    if let Some(path) = &args.save_output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        G2oLoader::write(&graph, path)?;
        info!("Saved optimized graph to {:?}", path);
    }

    Ok(())
}
