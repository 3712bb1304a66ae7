use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use platform::client::PlatformClient;
use platform::worker::EvalPool;

use stratum::metrics::export_metrics;
use stratum::primitives::Primitives;
use stratum::Result;

use super::checks;

#[derive(Debug, Clone, clap::Args)]
pub struct PrimitivesArgs {
    /// Full asset path to the input stack
    #[arg(short, long)]
    input_stack: String,
    /// Asset path(s) to training point dataset(s); several are merged
    #[arg(short, long, num_args = 1.., required = true)]
    training_data: Vec<String>,
    /// Property in the training points holding the class label
    #[arg(short, long)]
    class_name: String,
    /// Output asset path of the primitives image collection
    #[arg(short, long)]
    output: String,
    /// CRS string in the format EPSG:xxxxx; defaults to EPSG:4326
    #[arg(long)]
    crs: Option<String>,
    /// Export scale in meters
    #[arg(long)]
    scale: Option<u32>,
    /// Local folder for per-class importance and OOB error files
    #[arg(long)]
    metrics_folder: Option<PathBuf>,
    /// Concurrent remote evaluations during training
    #[arg(long, default_value_t = 8)]
    workers: usize,
    /// Run every check and print the would-be output paths without exporting
    #[arg(short = 'd', long)]
    dry_run: bool,
}

pub async fn run(client: &Arc<dyn PlatformClient>, args: &PrimitivesArgs) -> Result<()> {
    checks::ensure_asset_exists(client, &args.input_stack).await?;
    for training in args.training_data.iter() {
        checks::ensure_asset_exists(client, training).await?;
    }
    checks::ensure_asset_exists(client, checks::parent_folder(&args.output)).await?;
    // image exports into a pre-existing collection are forbidden
    checks::ensure_asset_absent(client, &args.output).await?;

    if args.dry_run {
        println!("would export Primitives ImageCollection to: {}", args.output);
        if let Some(metrics) = args.metrics_folder.as_ref() {
            println!("would export model metrics to: {}", metrics.display());
        }
        return Ok(());
    }

    let prims = Primitives::train(
        client,
        EvalPool::new(args.workers),
        &args.input_stack,
        &args.training_data,
        &args.class_name,
    )
    .await?;

    prims
        .export_to_asset(client, &args.output, args.scale, args.crs.clone())
        .await?;

    match args.metrics_folder.as_ref() {
        Some(dir) => export_metrics(prims.primitives(), dir)?,
        None => info!("no metrics folder given; skipping metrics export"),
    }

    Ok(())
}
