//! spaneval command line entrypoint

use anyhow::{bail, Context, Result};
use clap::Parser;
use spaneval::{
    evaluate, DatasetLoader, EvaluationConfig, JsonDataset, JsonLinesDataset,
    PrecomputedPredictor, Predictor, Scheme, ScoringMode,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "spaneval", version, about = "Scores entity predictions against a span annotated corpus")]
struct Args {
    /// Annotated corpus, either json lines or a json array of samples.
    #[arg(short, long)]
    dataset: PathBuf,
    /// Json configuration of the run. Every entity type is kept when absent.
    #[arg(short, long, env = "SPANEVAL_CONFIG")]
    config: Option<PathBuf>,
    /// Json lines file of precomputed predictions, one `{"id": .., "tags"|"spans": ..}` per line.
    #[arg(short, long)]
    predictions: Option<PathBuf>,
    /// Url of a Presidio-style analyzer, called once per sample.
    #[cfg(feature = "remote")]
    #[arg(short, long, conflicts_with = "predictions")]
    endpoint: Option<String>,
    /// Overrides the tagging scheme of the configuration.
    #[arg(short, long)]
    scheme: Option<Scheme>,
    /// Overrides the scoring mode of the configuration.
    #[arg(short, long)]
    mode: Option<ScoringMode>,
    /// Print the report as json instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn load_config(args: &Args) -> Result<EvaluationConfig> {
    let mut config = match &args.config {
        Some(path) => EvaluationConfig::from_json_file(path)?,
        None => EvaluationConfig::default(),
    };
    if let Some(scheme) = args.scheme {
        config.scheme = scheme;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    Ok(config)
}

fn dataset(path: &Path) -> Box<dyn DatasetLoader> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Box::new(JsonDataset::new(path)),
        _ => Box::new(JsonLinesDataset::new(path)),
    }
}

#[cfg(feature = "remote")]
fn remote_predictor(args: &Args, config: &EvaluationConfig) -> Result<Option<Box<dyn Predictor>>> {
    use spaneval::remote::PresidioAnalyzer;
    let Some(endpoint) = &args.endpoint else {
        return Ok(None);
    };
    let builder = PresidioAnalyzer::from_config(endpoint.as_str(), config);
    Ok(Some(Box::new(builder.build()?)))
}

#[cfg(not(feature = "remote"))]
fn remote_predictor(_args: &Args, _config: &EvaluationConfig) -> Result<Option<Box<dyn Predictor>>> {
    Ok(None)
}

fn predictor(args: &Args, config: &EvaluationConfig) -> Result<Box<dyn Predictor>> {
    if let Some(remote) = remote_predictor(args, config)? {
        return Ok(remote);
    }
    let Some(path) = &args.predictions else {
        bail!("No predictions to score, pass `--predictions`");
    };
    let predictions = PrecomputedPredictor::from_json_lines(path)
        .with_context(|| format!("Could not load the predictions of {}", path.display()))?;
    info!(count = predictions.len(), "loaded precomputed predictions");
    Ok(Box::new(predictions))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("Configuration:\n {}", config);
    let predictor = predictor(&args, &config)?;
    let dataset = dataset(&args.dataset);

    let now = Instant::now();
    let reporter = evaluate(config, dataset.as_ref(), predictor)?;
    info!(elapsed = now.elapsed().as_secs_f64(), "evaluation done");

    if args.json {
        println!("{}", reporter.to_json()?);
    } else {
        println!("{}", reporter);
    }
    Ok(())
}
