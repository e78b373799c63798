#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::Array2;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use coexnet::config::NetworkConfig;
use coexnet::io::{read_expression, read_weights, write_adjacency, write_expression, write_fit_table, write_masks};
use coexnet::progress::{ThresholdProgressObserver, ThresholdProgressStage};
use coexnet::threshold::pick_soft_threshold_with_progress;
use coexnet::{
    AdjacencyType, NetworkType, PowerEstimate, ThresholdInput, adjacency,
    good_samples_genes,
};

#[derive(Args)]
pub struct CommonArgs {
    /// Path to a TOML configuration file; command-line flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Tab-separated observation weights with the same layout as the expression file
    #[arg(long, value_name = "PATH")]
    pub weights: Option<PathBuf>,
}

#[derive(Args)]
pub struct FilterArgs {
    /// Tab-separated expression file (genes as rows, samples as columns)
    #[arg(value_name = "EXPRESSION_PATH")]
    pub expression: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Fraction of non-missing samples a gene needs (and of genes a sample needs)
    #[arg(long)]
    pub min_fraction: Option<f64>,

    /// Minimum number of good samples; fewer is an error
    #[arg(long)]
    pub min_n_samples: Option<usize>,

    /// Minimum number of good genes; fewer is an error
    #[arg(long)]
    pub min_n_genes: Option<usize>,

    /// Variance tolerance; defaults to 1e-10 times the largest absolute expression value
    #[arg(long)]
    pub tol: Option<f64>,

    /// Observations with a relative weight at or below this count as missing
    #[arg(long)]
    pub min_relative_weight: Option<f64>,

    /// Where to write the gene and sample keep-masks
    #[arg(long, value_name = "PATH", default_value = "keep_masks.tsv")]
    pub out_masks: PathBuf,

    /// Also write the expression matrix restricted to the kept genes and samples
    #[arg(long, value_name = "PATH")]
    pub out_filtered: Option<PathBuf>,
}

#[derive(Args)]
pub struct PickThresholdArgs {
    /// Tab-separated expression file, or a square similarity matrix with --similarity
    #[arg(value_name = "INPUT_PATH")]
    pub input: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Treat the input as a precomputed similarity matrix with entries in [0, 1]
    #[arg(long, conflicts_with = "weights")]
    pub similarity: bool,

    /// Run the good-genes/good-samples filter before the sweep
    #[arg(long, conflicts_with = "similarity")]
    pub filter: bool,

    /// Candidate powers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub powers: Option<Vec<f64>>,

    /// Network type: unsigned, signed or signed-hybrid
    #[arg(long)]
    pub network_type: Option<NetworkType>,

    /// A power is selected when its scale-free fit R^2 is above this value
    #[arg(long)]
    pub r_squared_cut: Option<f64>,

    /// Number of connectivity bins for the scale-free fit
    #[arg(long)]
    pub n_breaks: Option<usize>,

    /// Genes per block; planned from --max-memory when omitted
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Memory ceiling in bytes used to plan the block size
    #[arg(long, value_name = "BYTES")]
    pub max_memory: Option<u64>,

    /// Also report density, centralization and heterogeneity per power
    #[arg(long)]
    pub more_network_concepts: bool,

    /// Where to write the fit table
    #[arg(long, value_name = "PATH", default_value = "soft_threshold.tsv")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct AdjacencyArgs {
    /// Tab-separated expression file (genes as rows, samples as columns)
    #[arg(value_name = "EXPRESSION_PATH")]
    pub expression: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Adjacency type: unsigned, signed, signed-hybrid or distance
    #[arg(long = "type")]
    pub adjacency_type: Option<AdjacencyType>,

    /// Soft-threshold power
    #[arg(long)]
    pub power: Option<f64>,

    /// Restrict the columns to these gene indices (0-based, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub select_cols: Option<Vec<usize>>,

    /// Where to write the adjacency matrix
    #[arg(long, value_name = "PATH", default_value = "adjacency.tsv")]
    pub out: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "coexnet",
    about = "Weighted gene co-expression network construction",
    long_about = "Filters expression data for missingness and degenerate variance, picks a \
                 soft-threshold power by scale-free topology fit, and builds weighted \
                 adjacency matrices."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of worker threads (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Flag genes and samples with too many missing values (outputs: keep_masks.tsv)")]
    Filter(FilterArgs),

    #[command(about = "Pick a soft-threshold power (outputs: soft_threshold.tsv)")]
    PickThreshold(PickThresholdArgs),

    #[command(about = "Build a weighted adjacency matrix (outputs: adjacency.tsv)")]
    Adjacency(AdjacencyArgs),

    #[command(about = "Print the default TOML configuration")]
    Config {
        /// Write the configuration to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = configure_threads(cli.threads).and_then(|()| match cli.command {
        Some(Commands::Filter(args)) => run_filter(args),
        Some(Commands::PickThreshold(args)) => run_pick_threshold(args),
        Some(Commands::Adjacency(args)) => run_adjacency(args),
        Some(Commands::Config { output }) => run_config(output),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn configure_threads(threads: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(n) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()?;
    }
    Ok(())
}

fn load_config(common: &CommonArgs) -> Result<NetworkConfig, Box<dyn std::error::Error>> {
    match &common.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            Ok(NetworkConfig::load(path)?)
        }
        None => Ok(NetworkConfig::default()),
    }
}

fn load_weights(common: &CommonArgs) -> Result<Option<Array2<f64>>, Box<dyn std::error::Error>> {
    match &common.weights {
        Some(path) => Ok(Some(read_weights(path)?)),
        None => Ok(None),
    }
}

fn run_filter(args: FilterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.common)?;
    let filter = &mut config.filter;
    if let Some(v) = args.min_fraction {
        filter.min_fraction = v;
    }
    if let Some(v) = args.min_n_samples {
        filter.min_n_samples = v;
    }
    if let Some(v) = args.min_n_genes {
        filter.min_n_genes = v;
    }
    if args.tol.is_some() {
        filter.tol = args.tol;
    }
    if let Some(v) = args.min_relative_weight {
        filter.min_relative_weight = v;
    }

    let expr = read_expression(&args.expression)?;
    let weights = load_weights(&args.common)?;
    let outcome = good_samples_genes(&expr, weights.as_ref().map(|w| w.view()), &config.filter)?;

    let kept_genes = outcome.good_genes.iter().filter(|&&k| k).count();
    let kept_samples = outcome.good_samples.iter().filter(|&&k| k).count();
    println!(
        "Kept {kept_genes} of {} genes and {kept_samples} of {} samples ({} pass(es)).",
        expr.n_genes(),
        expr.n_samples(),
        outcome.iterations
    );

    write_masks(&args.out_masks, &expr, &outcome)?;
    println!("Keep-masks written to {}", args.out_masks.display());
    if let Some(path) = &args.out_filtered {
        let filtered = expr.subset(&outcome.good_genes, &outcome.good_samples)?;
        write_expression(path, &filtered)?;
        println!("Filtered expression written to {}", path.display());
    }
    Ok(())
}

fn run_pick_threshold(args: PickThresholdArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.common)?;
    let options = &mut config.threshold;
    if let Some(powers) = &args.powers {
        options.powers = powers.clone();
    }
    if let Some(network_type) = args.network_type {
        options.network_type = network_type;
    }
    if let Some(v) = args.r_squared_cut {
        options.r_squared_cut = v;
    }
    if let Some(v) = args.n_breaks {
        options.n_breaks = v;
    }
    if args.block_size.is_some() {
        options.block_size = args.block_size;
    }
    if let Some(v) = args.max_memory {
        options.max_memory_bytes = v;
    }
    if args.more_network_concepts {
        options.more_network_concepts = true;
    }

    let input = read_expression(&args.input)?;
    let weights = load_weights(&args.common)?;
    let mut progress = ProgressBarObserver::default();

    let result = if args.similarity {
        pick_soft_threshold_with_progress(
            ThresholdInput::Similarity(input.values()),
            &config.threshold,
            &mut progress,
        )?
    } else if args.filter {
        let outcome = good_samples_genes(&input, weights.as_ref().map(|w| w.view()), &config.filter)?;
        let expr = input.subset(&outcome.good_genes, &outcome.good_samples)?;
        let weights = weights
            .as_ref()
            .map(|w| outcome.select_weights(w.view()))
            .transpose()?;
        pick_soft_threshold_with_progress(
            ThresholdInput::Expression {
                expr: &expr,
                weights: weights.as_ref().map(|w| w.view()),
            },
            &config.threshold,
            &mut progress,
        )?
    } else {
        pick_soft_threshold_with_progress(
            ThresholdInput::Expression {
                expr: &input,
                weights: weights.as_ref().map(|w| w.view()),
            },
            &config.threshold,
            &mut progress,
        )?
    };

    println!(
        "{:>6}  {:>9}  {:>8}  {:>9}  {:>10}",
        "Power", "SFT.R.sq", "slope", "mean.k", "median.k"
    );
    for record in &result.table {
        println!(
            "{:>6}  {:>9.4}  {:>8.3}  {:>9.3}  {:>10.3}",
            record.power, record.r_squared, record.slope, record.mean_k, record.median_k
        );
    }
    match result.estimate {
        PowerEstimate::Selected(power) => println!("Selected power: {power}"),
        PowerEstimate::NoneQualified => {
            if let Err(e) = result.selected_power() {
                println!("No power selected: {e}");
            }
        }
    }

    write_fit_table(&args.out, &result)?;
    println!("Fit table written to {}", args.out.display());
    Ok(())
}

fn run_adjacency(args: AdjacencyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.common)?;
    let options = &mut config.adjacency;
    if let Some(adjacency_type) = args.adjacency_type {
        options.adjacency_type = adjacency_type;
    }
    if let Some(power) = args.power {
        options.power = power;
    }
    if args.select_cols.is_some() {
        options.select_cols = args.select_cols.clone();
    }

    let expr = read_expression(&args.expression)?;
    let weights = load_weights(&args.common)?;
    let adj = adjacency(&expr, weights.as_ref().map(|w| w.view()), &config.adjacency)?;
    write_adjacency(&args.out, &adj)?;
    println!(
        "{} x {} {} adjacency (power {}) written to {}",
        adj.matrix.nrows(),
        adj.matrix.ncols(),
        config.adjacency.adjacency_type,
        config.adjacency.power,
        args.out.display()
    );
    Ok(())
}

fn run_config(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::default();
    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Default configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}

/// Draws the power sweep on stderr, one bar per stage.
#[derive(Default)]
struct ProgressBarObserver {
    bar: Option<ProgressBar>,
}

impl ThresholdProgressObserver for ProgressBarObserver {
    fn on_stage_start(&mut self, stage: ThresholdProgressStage, total: usize) {
        self.bar = Some(create_progress_bar(total as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, _stage: ThresholdProgressStage, processed: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, _stage: ThresholdProgressStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());

    pb
}
