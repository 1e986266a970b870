use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use layerflow::{EngineError, Model, ModelConfig};

/// Run a forward pass of a pretrained model and print its outputs as JSON
#[derive(Debug, Parser)]
#[command(name = "layerflow")]
#[command(about = "Declarative DAG inference engine", long_about = None)]
struct Cli {
    /// JSON model config (filepaths, headers, accelerate, pipelineMode, ...)
    #[arg(long, value_name = "CONFIG")]
    config: PathBuf,

    /// JSON object mapping input names to flat f32 arrays
    #[arg(long, value_name = "INPUTS", conflicts_with = "random_input")]
    input: Option<PathBuf>,

    /// Feed uniformly random values in [-1, 1) to every input
    #[arg(long)]
    random_input: bool,

    /// Seed for --random-input
    #[arg(long)]
    seed: Option<u64>,

    /// Force accelerated execution on
    #[arg(long)]
    accelerate: bool,

    /// Keep accelerated results on the device between layers
    #[arg(long)]
    pipeline: bool,

    /// Print the layer table before running
    #[arg(long)]
    summary: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn random_inputs(model: &Model, seed: Option<u64>) -> Result<HashMap<String, Vec<f32>>, EngineError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Ok(model
        .inputs()?
        .iter()
        .map(|input| {
            let values: Vec<f32> = (0..input.num_elements())
                .map(|_| rng.random_range(-1.0..1.0))
                .collect();
            (input.name.clone(), values)
        })
        .collect())
}

fn run(cli: Cli) -> Result<(), EngineError> {
    let mut config = ModelConfig::from_file(&cli.config)?;
    config.accelerate |= cli.accelerate || cli.pipeline;
    config.pipeline_mode |= cli.pipeline;

    let mut model = Model::new(config)?;
    model.ready()?;
    info!(progress = model.load_progress(), "model loaded");

    if cli.summary {
        model.print_model_stats()?;
    }

    let inputs = match (&cli.input, cli.random_input) {
        (Some(path), _) => serde_json::from_slice(&std::fs::read(path)?)?,
        (None, true) => random_inputs(&model, cli.seed)?,
        (None, false) => {
            return Err(EngineError::Configuration(
                "pass --input <file> or --random-input".into(),
            ));
        }
    };

    let outputs: BTreeMap<_, _> = model.predict(&inputs)?.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
