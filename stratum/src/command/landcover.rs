use std::sync::Arc;

use tracing::info;

use platform::client::PlatformClient;
use platform::export::ImageExportParams;
use platform::graph::RegionRef;

use stratum::primitives::Primitives;
use stratum::Result;

use super::checks;

#[derive(Debug, Clone, clap::Args)]
pub struct LandcoverArgs {
    /// Asset path to the input primitives image collection
    #[arg(short, long)]
    input: String,
    /// Asset path for the assembled classification export
    #[arg(short, long)]
    output: String,
    /// CRS string in the format EPSG:xxxxx; defaults to EPSG:4326
    #[arg(long)]
    crs: Option<String>,
    /// Export scale in meters
    #[arg(long)]
    scale: Option<u32>,
    /// Remap the sequential class labels onto these values, one per primitive
    #[arg(long, num_args = 1..)]
    remap_to: Option<Vec<i64>>,
    /// Run every check and print the would-be output path without exporting
    #[arg(short = 'd', long)]
    dry_run: bool,
}

pub async fn run(client: &Arc<dyn PlatformClient>, args: &LandcoverArgs) -> Result<()> {
    checks::ensure_asset_absent(client, &args.output).await?;
    checks::ensure_asset_exists(client, &args.input).await?;

    if args.dry_run {
        println!("would export (Asset): {}", args.output);
        return Ok(());
    }

    let mut prims = Primitives::from_collection(client, &args.input).await?;
    let classification = prims.assemble(args.remap_to.as_deref())?;

    // export bounded by the collection's footprint
    let region = prims.region();
    let bounds = RegionRef(
        prims
            .graph_mut()
            .invoke("Geometry.bounds", [("geometry", region.into())]),
    );

    let description = checks::description_from_path(&args.output);
    let params = ImageExportParams::to_asset(&description, &args.output)
        .region(bounds)
        .scale(args.scale)
        .crs(args.crs.clone());
    let task = client
        .export_image(prims.graph(), classification.node(), &params)
        .await?;
    info!(%task, asset = args.output.as_str(), "export started (asset)");

    Ok(())
}
