use std::sync::Arc;

use tracing::info;

use platform::client::PlatformClient;
use platform::export::TableExportParams;
use platform::graph::{ExprGraph, ImageRef, RegionRef};

use stratum::sampling::{format_points, stratified_from_image, StratifiedSpec};
use stratum::Result;

use super::checks;

const DRIVE_FOLDER: &str = "landcover-samples";

#[derive(Debug, Clone, clap::Args)]
pub struct SamplePtsArgs {
    /// Asset path to the image being sampled
    #[arg(short = 'i', long)]
    input_image: String,
    /// Class band name to stratify on
    #[arg(short = 'b', long)]
    class_band: String,
    /// Output asset path basename for export
    #[arg(short, long)]
    output: String,
    /// Sampling scale in meters
    #[arg(long, default_value_t = 10)]
    scale: u32,
    /// Number of points per class (default 100)
    #[arg(long)]
    n_points: Option<u32>,
    /// Unique class values present in the class band
    #[arg(long, num_args = 1..)]
    class_values: Option<Vec<i64>>,
    /// Points to collect per class, paired with --class-values
    #[arg(long, num_args = 1..)]
    class_points: Option<Vec<u32>>,
    /// Export to a platform asset only
    #[arg(short = 'a', long)]
    to_asset: bool,
    /// Export to a drive folder only
    #[arg(short = 't', long)]
    to_drive: bool,
    /// Draw a fresh random seed instead of the fixed default
    #[arg(short, long)]
    reshuffle: bool,
    /// Run every check and print the would-be output paths without exporting
    #[arg(short = 'd', long)]
    dry_run: bool,
}

pub async fn run(client: &Arc<dyn PlatformClient>, args: &SamplePtsArgs) -> Result<()> {
    let spec = StratifiedSpec {
        n_points: args.n_points,
        class_values: args.class_values.clone(),
        class_points: args.class_points.clone(),
    };
    // argument consistency fails before any remote call
    spec.validate()?;

    checks::ensure_asset_exists(client, &args.input_image).await?;
    checks::ensure_asset_exists(client, checks::parent_folder(&args.output)).await?;

    let description = checks::description_from_path(&args.output);
    let drive_description = format!("{}-Drive", description);
    let asset_description = format!("{}-Asset", description);

    let export_asset = args.to_asset || !args.to_drive;
    let export_drive = args.to_drive || !args.to_asset;

    if args.dry_run {
        if export_asset {
            println!("would export (Asset): {}", args.output);
        }
        if export_drive {
            println!("would export (Drive): {}/{}", DRIVE_FOLDER, drive_description);
        }
        return Ok(());
    }

    let seed = checks::resolve_seed(args.reshuffle);

    let mut graph = ExprGraph::new();
    let image = ImageRef(graph.invoke("Image.load", [("asset", args.input_image.as_str().into())]));
    let footprint = graph.invoke("Image.geometry", [("image", image.into())]);
    let region = RegionRef(graph.invoke("Geometry.bounds", [("geometry", footprint.into())]));

    let samples = stratified_from_image(
        &mut graph,
        image,
        &args.class_band,
        region,
        args.scale,
        seed,
        &spec,
    )?;
    let formatted = format_points(&mut graph, samples, None);

    let selectors = vec![
        "LON".to_string(),
        "LAT".to_string(),
        "PLOTID".to_string(),
        "SAMPLEID".to_string(),
        args.class_band.clone(),
    ];

    if export_asset {
        let params = TableExportParams::to_asset(&asset_description, &args.output);
        let task = client.export_table(&graph, formatted.node(), &params).await?;
        info!(%task, asset = args.output.as_str(), "export started (asset)");
    }
    if export_drive {
        let params = TableExportParams::to_drive(&drive_description, DRIVE_FOLDER, &description)
            .selectors(selectors);
        let task = client.export_table(&graph, formatted.node(), &params).await?;
        info!(%task, folder = DRIVE_FOLDER, "export started (drive)");
    }

    Ok(())
}
