use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};

use rendertform::config::TransformConfig;
use rendertform::thin_plate_spline::linspace_grid;
use rendertform::transform_spec::TransformList;
use rendertform::{estimate_transformsum, Evaluator, LeafKind, ReferencePool, TransformSpec};

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "Apply, reduce and simplify render transform specs.")]
struct Args {
    /// Log level filter, e.g. "info" or "rendertform=debug"
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// JSON file with tunables (missing keys keep their defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Map points through a transform spec and print them as "x y" lines.
    Apply {
        /// Transform record, or an array of records applied in order
        #[arg(long)]
        spec: PathBuf,

        /// Array of shared transform records that "ref" nodes point to
        #[arg(long)]
        pool: Option<PathBuf>,

        /// Whitespace separated "x y" lines (stdin if omitted)
        #[arg(long)]
        points: Option<PathBuf>,

        /// Map through the inverse instead
        #[arg(long)]
        inverse: bool,
    },

    /// Replace a transform chain by a single fitted transform, printed as JSON.
    Reduce {
        #[arg(long)]
        spec: PathBuf,

        #[arg(long)]
        pool: Option<PathBuf>,

        /// Sample an N x N grid over the tile
        #[arg(long, default_value_t = 32)]
        grid: usize,

        /// Polynomial order used when the chain is not purely affine
        #[arg(long, default_value_t = 2)]
        order: usize,

        /// Tile width in pixels
        #[arg(long)]
        width: f64,

        /// Tile height in pixels
        #[arg(long)]
        height: f64,
    },

    /// Reduce the control points of a thin-plate spline leaf, printed as JSON.
    SimplifyTps {
        #[arg(long)]
        spec: PathBuf,
    },
}

fn setup_logging(level: &str) -> anyhow::Result<LoggerHandle> {
    let handle = Logger::try_with_str(level)
        .with_context(|| format!("invalid log level '{}'", level))?
        .log_to_stderr()
        .start()
        .context("Logger initialization failed")?;
    Ok(handle)
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

/// Reads one record, or an array of records as a list.
fn read_spec(path: &Path) -> anyhow::Result<TransformSpec> {
    let value: serde_json::Value = serde_json::from_str(&read_text(path)?)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let spec = if value.is_array() {
        TransformSpec::List(TransformList {
            tforms: serde_json::from_value(value)?,
            id: None,
        })
    } else {
        serde_json::from_value(value)?
    };
    Ok(spec)
}

fn read_pool(path: Option<&Path>) -> anyhow::Result<ReferencePool> {
    let Some(path) = path else {
        return Ok(ReferencePool::new());
    };
    let specs: Vec<TransformSpec> = serde_json::from_str(&read_text(path)?)
        .with_context(|| format!("could not parse reference pool {}", path.display()))?;
    let pool = ReferencePool::from_specs(specs)?;
    info!("loaded {} shared transforms", pool.len());
    Ok(pool)
}

fn read_points(path: Option<&Path>) -> anyhow::Result<Vec<[f64; 2]>> {
    let text = match path {
        Some(path) => read_text(path)?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).context("could not read stdin")?;
            text
        }
    };
    let mut points = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [x, y] => points.push([
                x.parse().with_context(|| format!("line {}: bad x '{}'", n + 1, x))?,
                y.parse().with_context(|| format!("line {}: bad y '{}'", n + 1, y))?,
            ]),
            _ => bail!("line {}: expected 'x y', got '{}'", n + 1, line),
        }
    }
    Ok(points)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logger = setup_logging(&args.log_level)?;

    let config = match &args.config {
        Some(path) => TransformConfig::from_json_str(&read_text(path)?)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => TransformConfig::default(),
    };
    debug!("using configuration {:?}", config);

    match args.command {
        Command::Apply {
            spec,
            pool,
            points,
            inverse,
        } => {
            let spec = read_spec(&spec)?;
            let pool = read_pool(pool.as_deref())?;
            let points = read_points(points.as_deref())?;
            let evaluator = Evaluator::new(&pool)
                .with_inverse_config(config.inverse)
                .with_limits(config.evaluator);
            let mapped = if inverse {
                evaluator.evaluate_inverse(&spec, &points)?
            } else {
                evaluator.evaluate(&spec, &points)?
            };
            for p in mapped {
                println!("{} {}", p[0], p[1]);
            }
        }
        Command::Reduce {
            spec,
            pool,
            grid,
            order,
            width,
            height,
        } => {
            let spec = read_spec(&spec)?;
            let pool = read_pool(pool.as_deref())?;
            let chain = match spec {
                TransformSpec::List(list) => list.tforms,
                other => vec![other],
            };
            let src = linspace_grid([0.0, 0.0], [width, height], grid);
            let evaluator = Evaluator::new(&pool)
                .with_inverse_config(config.inverse)
                .with_limits(config.evaluator);
            let leaf = estimate_transformsum(&chain, &src, order, &evaluator, &config.polynomial_fit)?;
            info!("reduced {} transforms to {}", chain.len(), leaf.class_name());
            println!("{}", serde_json::to_string_pretty(&TransformSpec::Leaf(leaf))?);
        }
        Command::SimplifyTps { spec } => {
            let TransformSpec::Leaf(mut leaf) = read_spec(&spec)? else {
                bail!("simplify-tps expects a single leaf transform");
            };
            let LeafKind::ThinPlateSpline(tps) = &leaf.kind else {
                bail!("simplify-tps expects a thin-plate spline, got {}", leaf.class_name());
            };
            let reduced = tps.adaptive_mesh_estimate(&config.mesh_refine)?;
            info!(
                "control points: {} -> {}",
                tps.get_n_lm(),
                reduced.get_n_lm()
            );
            leaf.kind = LeafKind::ThinPlateSpline(reduced);
            println!("{}", serde_json::to_string_pretty(&TransformSpec::Leaf(leaf))?);
        }
    }
    Ok(())
}
