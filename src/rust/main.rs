use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use seqclass::{
    ClassifierChain, ClassifierConfig, ClassifierPreset, ComputeDevice, Dataset, DownloadManifest,
    ModelManager, SequenceClassifierBuilder,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    Quality,
    Domain,
}

impl From<PresetArg> for ClassifierPreset {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Quality => ClassifierPreset::Quality,
            PresetArg::Domain => ClassifierPreset::Domain,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Cpu,
    Accelerator,
}

impl From<DeviceArg> for ComputeDevice {
    fn from(device: DeviceArg) -> Self {
        match device {
            DeviceArg::Cpu => ComputeDevice::Cpu,
            DeviceArg::Accelerator => ComputeDevice::Accelerator,
        }
    }
}

/// Scores a JSONL dataset with one or more fine-tuned sequence classifiers.
///
/// Passing several checkpoints builds an ensemble: every checkpoint writes its
/// own `<column>_<i>` prediction and probability columns.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input dataset, one JSON object per line
    #[arg(short, long)]
    input: PathBuf,

    /// Output path; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fine-tuned checkpoint (SafeTensors); repeat for an ensemble
    #[arg(short, long = "checkpoint", required = true)]
    checkpoints: Vec<PathBuf>,

    /// Fine-tuned encoder graph (ONNX), one per checkpoint in the same order
    #[arg(long = "encoder")]
    encoders: Vec<PathBuf>,

    /// Labels, column names and limits of a published classifier
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    /// JSON classifier config applied before the other flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Class labels in output order
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Base architecture hub identifier
    #[arg(long)]
    architecture: Option<String>,

    #[arg(long)]
    text_field: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_chars: Option<usize>,

    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// Disable half-precision inference on the accelerator
    #[arg(long)]
    full_precision: bool,

    /// Keep only rows predicted as one of these labels
    #[arg(long, value_delimiter = ',')]
    filter: Option<Vec<String>>,

    /// Rows per partition; 0 keeps the whole input in one partition
    #[arg(long, default_value_t = 0)]
    partition_size: usize,

    /// Score partitions concurrently
    #[arg(long)]
    parallel: bool,

    /// Download the base architecture if it is not cached
    #[arg(long)]
    download: bool,

    /// Force a fresh download of the architecture files
    #[arg(short, long)]
    fresh: bool,
}

async fn ensure_architecture_downloaded(
    manager: &ModelManager,
    architecture: &str,
    fresh: bool,
) -> Result<()> {
    if fresh {
        info!("Fresh download requested - removing any existing files for {}...", architecture);
        manager.remove_download(architecture)?;
    }

    if !manager.is_architecture_downloaded(architecture) {
        info!("Downloading {}...", architecture);
    }
    manager
        .ensure_downloaded(architecture, &DownloadManifest::onnx_export())
        .await
        .with_context(|| format!("Failed to download {}", architecture))?;

    Ok(())
}

fn base_builder(args: &Args) -> Result<SequenceClassifierBuilder> {
    let mut builder = SequenceClassifierBuilder::new();
    if let Some(path) = &args.config {
        let config = ClassifierConfig::from_json_file(path)?;
        builder = builder.with_config(config);
    }
    if let Some(preset) = args.preset {
        builder = builder.with_preset(preset.into());
    }
    if let Some(labels) = &args.labels {
        builder = builder.with_labels(labels.clone());
    }
    if let Some(architecture) = &args.architecture {
        builder = builder.with_base_architecture(architecture.clone());
    }
    if let Some(field) = &args.text_field {
        builder = builder.with_text_field(field.clone());
    }
    if let Some(batch_size) = args.batch_size {
        builder = builder.with_batch_size(batch_size);
    }
    if let Some(max_chars) = args.max_chars {
        builder = builder.with_max_chars(max_chars);
    }
    if let Some(device) = args.device {
        builder = builder.with_device(device.into());
    }
    if args.full_precision {
        builder = builder.with_reduced_precision(false);
    }
    if let Some(filter) = &args.filter {
        builder = builder.with_filter(filter.clone());
    }
    Ok(builder.with_parallel_partitions(args.parallel))
}

/// One classifier per checkpoint. Ensemble members get `_<i>` column suffixes.
fn build_chain(args: &Args, manager: &ModelManager) -> Result<ClassifierChain> {
    let ensemble = args.checkpoints.len() > 1;
    if ensemble && args.filter.is_some() {
        bail!("--filter cannot be combined with several checkpoints");
    }
    if !args.encoders.is_empty() && args.encoders.len() != args.checkpoints.len() {
        bail!("--encoder must be given once per checkpoint");
    }

    let mut chain = ClassifierChain::new();
    for (i, checkpoint) in args.checkpoints.iter().enumerate() {
        let mut builder = base_builder(args)?
            .with_model_manager(manager.clone())
            .with_checkpoint(checkpoint)?;
        if let Some(encoder) = args.encoders.get(i) {
            builder = builder.with_encoder_graph(encoder)?;
        }
        if ensemble {
            let prediction = format!("{}_{}", builder.config().prediction_column, i);
            let probability = builder.config().probability_column.as_ref().map(|p| format!("{}_{}", p, i));
            builder = builder.with_prediction_column(prediction);
            if let Some(probability) = probability {
                builder = builder.with_probability_column(probability);
            }
        }
        chain = chain.then(builder.build()?);
    }
    Ok(chain)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("=== Starting Sequence Classification ===");
    let start_time = Instant::now();

    let manager = ModelManager::new_default()?;
    let chain = build_chain(&args, &manager)?;

    if args.download || args.fresh {
        let architecture = base_builder(&args)?.config().base_architecture.clone();
        ensure_architecture_downloaded(&manager, &architecture, args.fresh).await?;
    }

    let reader = BufReader::new(
        File::open(&args.input).with_context(|| format!("Failed to open {}", args.input.display()))?,
    );
    let dataset = Dataset::read_jsonl(reader, args.partition_size)?;
    info!("Read {} records in {} partitions", dataset.len(), dataset.num_partitions());

    let classify_start = Instant::now();
    let rows_in = dataset.len();
    let scored = chain.run(dataset)?;
    let classify_time = classify_start.elapsed();

    match &args.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            scored.write_jsonl(BufWriter::new(file))?;
        }
        None => scored.write_jsonl(BufWriter::new(io::stdout().lock()))?,
    }

    info!("\n=== Scoring Complete ===");
    info!("Records in: {}, records out: {}", rows_in, scored.len());
    info!("Classification time: {:.2?}", classify_time);
    if rows_in > 0 {
        info!("Average time per record: {:.2?}", classify_time / rows_in as u32);
    }
    info!("Total time: {:.2?}", start_time.elapsed());

    Ok(())
}
