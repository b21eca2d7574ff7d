use anyhow::Context;
use atlas_registration::analysis::{intersection, merge, BinSampler, BlockSampler, SampleTable};
use atlas_registration::config::{load_config_or_default, Config};
use atlas_registration::data::{load_volume, save_volume};
use atlas_registration::logging::{init_logging, LoggingGuard, MetricsCollector};
use atlas_registration::pipeline::progress::{channel, TracingSink};
use atlas_registration::pipeline::cohort::{CONSENSUS_NAME, REPORT_NAME};
use atlas_registration::pipeline::Cohort;
use atlas_registration::transform::{load_sequence, save_sequence};
use atlas_registration::*;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "Groupwise orthogonal-plane elastic registration of 3D volumes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of worker threads
    #[arg(long, global = true)]
    cores: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a cohort of volumes to each other
    Register {
        /// Volume directories, at least two
        #[arg(short, long, num_args = 2.., required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for registered volumes and sequences
        #[arg(short, long, default_value = "results/registered")]
        output: PathBuf,

        /// Number of iterations over the three planes
        #[arg(short = 'n', long)]
        iterations: Option<usize>,

        /// Plane visited first (YZ, ZX or XY)
        #[arg(short, long)]
        first_plane: Option<OrthogonalPlane>,

        /// Leave out each volume's registration against itself
        #[arg(long)]
        no_self_pair: bool,

        /// Register only this label value (inputs become 0/255 masks)
        #[arg(short, long)]
        label: Option<f32>,
    },

    /// Replay a saved transform sequence on another volume
    Apply {
        /// Sequence file (.ots)
        #[arg(short, long)]
        sequence: PathBuf,

        /// Volume directory
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Scale fields to volumes of a different size
        #[arg(long)]
        rescale: bool,

        /// Replay only the first N iterations
        #[arg(short = 'n', long)]
        iterations: Option<usize>,
    },

    /// Voxelwise mean and standard deviation of registered volumes
    Merge {
        #[arg(short, long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = "results/merged")]
        output: PathBuf,
    },

    /// Project a signal volume onto one label in blocks
    Project {
        /// Label volume directory
        #[arg(short, long)]
        label: PathBuf,

        /// Label value to project onto
        #[arg(short = 'V', long)]
        value: f32,

        /// Signal volume directory
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Tabulate mean signal in fixed-size bins, one row per volume
    Sample {
        /// Volume directories
        #[arg(short, long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,

        /// Table file; .json for JSON, tab-separated otherwise
        #[arg(short, long, default_value = "results/samples.tsv")]
        output: PathBuf,

        /// Bin edge in calibrated units
        #[arg(short, long)]
        bin_size: Option<f64>,
    },

    /// Describe a saved transform sequence
    Inspect {
        #[arg(short, long)]
        sequence: PathBuf,
    },

    /// Write a cohort of jittered cube masks for testing
    Synthesize {
        #[arg(short, long, default_value = "results/synthetic")]
        output: PathBuf,

        #[arg(short = 'n', long, default_value = "3")]
        count: usize,

        /// Edge length of each volume in voxels
        #[arg(short, long, default_value = "32")]
        size: usize,

        /// Maximum cube offset in voxels
        #[arg(short, long, default_value = "2")]
        jitter: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref().and_then(Path::to_str));
    if let Some(cores) = cli.cores {
        config.concurrency.core_budget = Some(cores);
    }
    config.logging = config.logging.clone().with_verbosity(cli.verbose);
    let _guard: LoggingGuard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Register { inputs, output, iterations, first_plane, no_self_pair, label } => {
            if let Some(iterations) = iterations {
                config.schedule.iterations = iterations;
            }
            if let Some(first_plane) = first_plane {
                config.schedule.first_plane = first_plane;
            }
            if no_self_pair {
                config.schedule.include_self_pair = false;
            }
            handle_register(&config, inputs, output, label)?;
        }
        Commands::Apply { sequence, input, output, rescale, iterations } => {
            handle_apply(sequence, input, output, rescale, iterations)?;
        }
        Commands::Merge { inputs, output } => {
            handle_merge(inputs, output)?;
        }
        Commands::Project { label, value, input, output } => {
            handle_project(&config, label, value, input, output)?;
        }
        Commands::Sample { inputs, output, bin_size } => {
            if let Some(bin_size) = bin_size {
                config.sampling.bin_size = bin_size;
            }
            handle_sample(&config, inputs, output)?;
        }
        Commands::Inspect { sequence } => {
            handle_inspect(sequence)?;
        }
        Commands::Synthesize { output, count, size, jitter, seed } => {
            handle_synthesize(output, count, size, jitter, seed)?;
        }
    }

    Ok(())
}

fn volume_label(path: &Path, index: usize) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("volume_{}", index))
}

fn load_all(paths: &[PathBuf]) -> anyhow::Result<Vec<Volume>> {
    paths
        .iter()
        .map(|p| load_volume(p).with_context(|| format!("loading {}", p.display())))
        .collect()
}

fn handle_register(
    config: &Config,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    label: Option<f32>,
) -> anyhow::Result<()> {
    let labels: Vec<String> = inputs.iter().enumerate().map(|(i, p)| volume_label(p, i)).collect();
    let mut volumes = load_all(&inputs)?;
    if let Some(label) = label {
        volumes = volumes.iter().map(|v| v.isolate_label(label)).collect();
    }
    let cohort = Cohort::from_parts(labels, volumes)?;

    let (reporter, monitor) = channel();
    let monitor = monitor.spawn(TracingSink);
    let metrics = MetricsCollector::new(true);
    let scheduler = GroupwiseScheduler::new(Arc::new(PhaseCorrelationRegistration), config)?
        .with_progress(reporter)
        .with_metrics(metrics.clone());

    let result = scheduler.run(cohort);
    drop(scheduler);
    let _ = monitor.join();
    let outcome = result?;

    for stats in metrics.summary() {
        tracing::debug!(
            stage = %stats.operation,
            count = stats.count,
            mean_ms = stats.mean_ms,
            p95_ms = stats.p95_ms,
            "Stage timing"
        );
    }

    std::fs::create_dir_all(&output)?;
    for member in &outcome.members {
        save_volume(&member.volume, output.join(&member.label))?;
        save_sequence(&member.sequence, output.join(format!("{}.ots", member.label)))?;
    }

    let registered: Vec<Volume> = outcome.volumes().cloned().collect();
    let consensus = intersection(&registered)?;
    save_volume(&consensus, output.join(CONSENSUS_NAME))?;

    let report_path = output.join(REPORT_NAME);
    std::fs::write(&report_path, serde_json::to_string_pretty(&outcome.report)?)?;

    println!(
        "Registered {} volumes ({} iterations, {} primitive calls) in {:.1} ms",
        outcome.report.volume_count,
        outcome.report.iterations,
        outcome.report.primitive_calls,
        outcome.report.total_ms
    );
    println!("Consensus voxels: {}", consensus.count_nonzero());
    println!("Results written to {}", output.display());
    Ok(())
}

fn handle_apply(
    sequence_path: PathBuf,
    input: PathBuf,
    output: PathBuf,
    rescale: bool,
    iterations: Option<usize>,
) -> anyhow::Result<()> {
    let sequence = load_sequence(&sequence_path)?;
    let volume = load_volume(&input)?;

    let mut applier = SequenceApplier::new().with_rescale(rescale);
    if let Some(iterations) = iterations {
        applier = applier.with_iterations(iterations);
    }
    let registered = applier.apply(&sequence, volume)?;
    save_volume(&registered, &output)?;

    println!(
        "Applied {} of {} iterations to {} -> {}",
        applier.effective_iterations(&sequence),
        sequence.iteration_count(),
        input.display(),
        output.display()
    );
    Ok(())
}

fn handle_merge(inputs: Vec<PathBuf>, output: PathBuf) -> anyhow::Result<()> {
    let volumes = load_all(&inputs)?;
    let merged = merge(&volumes)?;
    save_volume(&merged.mean, output.join("mean"))?;
    save_volume(&merged.std_dev, output.join("std"))?;
    println!("Merged {} volumes into {}", merged.count, output.display());
    Ok(())
}

fn handle_project(
    config: &Config,
    label: PathBuf,
    value: f32,
    input: PathBuf,
    output: PathBuf,
) -> anyhow::Result<()> {
    let label = load_volume(&label)?;
    let input = load_volume(&input)?;
    let sampler = BlockSampler::from_config(&config.projection, config.concurrency.effective_budget());
    let grid = sampler.grid(input.dims(), input.calibration())?;
    let projected = sampler.project(&label, value, &input)?;
    save_volume(&projected, &output)?;
    println!(
        "Projected onto label {} with {} blocks of {} voxels -> {}",
        value,
        grid.blocks,
        grid.block,
        output.display()
    );
    Ok(())
}

fn handle_sample(config: &Config, inputs: Vec<PathBuf>, output: PathBuf) -> anyhow::Result<()> {
    let sampler = BinSampler::from_config(&config.sampling, config.concurrency.effective_budget());
    let mut table = SampleTable::new();
    for (i, path) in inputs.iter().enumerate() {
        let volume = load_volume(path).with_context(|| format!("loading {}", path.display()))?;
        let samples = sampler.sample(&volume)?;
        tracing::info!(
            volume = %path.display(),
            bins = %samples.bins,
            kept = samples.samples.len(),
            "Sampled"
        );
        table.push(volume_label(path, i), &samples)?;
    }
    table.save(&output)?;
    println!(
        "Sampled {} volumes into {} bins -> {}",
        table.len(),
        table.columns().len(),
        output.display()
    );
    Ok(())
}

fn handle_inspect(path: PathBuf) -> anyhow::Result<()> {
    let sequence = load_sequence(&path)?;
    println!("Sequence:    {}", path.display());
    println!("Dimensions:  {}", sequence.dimensions());
    println!("First plane: {}", sequence.first_plane());
    println!("Iterations:  {}", sequence.iteration_count());
    println!("Complete:    {}", sequence.is_complete());

    let first_plane = sequence.first_plane();
    let mut dims = (0..first_plane.lead_in()).fold(sequence.dimensions(), |d, _| d.resliced());
    for iteration in 0..sequence.iteration_count() {
        for plane in first_plane.pass_order() {
            dims = dims.resliced();
            match sequence.get(iteration, plane) {
                Ok(field) => println!(
                    "  [{}] {:<2} {}x{} intervals={} mean |d|={:.3}",
                    iteration,
                    plane,
                    dims.x,
                    dims.y,
                    field.intervals(),
                    field.mean_displacement(dims.x, dims.y)
                ),
                Err(_) => println!("  [{}] {:<2} missing", iteration, plane),
            }
        }
    }
    Ok(())
}

fn handle_synthesize(
    output: PathBuf,
    count: usize,
    size: usize,
    jitter: usize,
    seed: u64,
) -> anyhow::Result<()> {
    anyhow::ensure!(size >= 4, "size must be at least 4");
    anyhow::ensure!(jitter < size / 4, "jitter must be below size / 4");

    let mut rng = StdRng::seed_from_u64(seed);
    let dims = Dims::new(size, size, size);
    let (lo, hi) = (size / 4, size - size / 4);

    for i in 0..count {
        let offset: Vec<isize> = (0..3)
            .map(|_| rng.gen_range(-(jitter as isize)..=jitter as isize))
            .collect();
        let inside = |c: usize, o: isize| {
            let c = c as isize - o;
            c >= lo as isize && c < hi as isize
        };
        let volume = Volume::from_fn(dims, BitDepth::Eight, |x, y, z| {
            if inside(x, offset[0]) && inside(y, offset[1]) && inside(z, offset[2]) {
                255.0
            } else {
                0.0
            }
        })?;
        let dir = output.join(format!("volume_{}", i));
        save_volume(&volume, &dir)?;
        println!("{} offset=({}, {}, {})", dir.display(), offset[0], offset[1], offset[2]);
    }
    Ok(())
}
