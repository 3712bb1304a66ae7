use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use platform::client::PlatformClient;
use platform::export::ImageExportParams;
use platform::graph::{ExprGraph, RegionRef, TableRef};

use stratum::composite::{build_composite, build_merged_composite};
use stratum::datasets::DatasetSpec;
use stratum::settings::CompositeOptions;
use stratum::Result;

use super::checks;

#[derive(Debug, Clone, clap::Args)]
pub struct CompositeArgs {
    /// Asset path to an AOI or reference polygon dataset
    #[arg(short, long)]
    aoi: String,
    /// Dataset(s) to composite: a catalog name or an image-collection asset path
    #[arg(short, long, num_args = 1.., required = true)]
    data: Vec<String>,
    /// Start date (yyyy-mm-dd)
    #[arg(short, long)]
    start: String,
    /// End date (yyyy-mm-dd)
    #[arg(short, long)]
    end: String,
    /// Full asset path for export
    #[arg(short, long)]
    output: String,
    /// Settings JSON file
    #[arg(long)]
    settings: PathBuf,
    /// Output scale in meters
    #[arg(long)]
    scale: u32,
    /// CRS string in the format EPSG:xxxxx; defaults to EPSG:4326
    #[arg(long)]
    crs: Option<String>,
    /// Run every check and print the would-be output path without exporting
    #[arg(long)]
    dry_run: bool,
}

pub async fn run(client: &Arc<dyn PlatformClient>, args: &CompositeArgs) -> Result<()> {
    let datasets: Vec<DatasetSpec> = args
        .data
        .iter()
        .map(|name| name.parse())
        .collect::<Result<_>>()?;
    checks::check_date_format(&args.start)?;
    checks::check_date_format(&args.end)?;
    let options = CompositeOptions::resolve(args.settings.clone())?;

    checks::ensure_asset_absent(client, &args.output).await?;
    checks::ensure_asset_exists(client, &args.aoi).await?;
    checks::ensure_asset_exists(client, checks::parent_folder(&args.output)).await?;

    if args.dry_run {
        println!("would export (Asset): {}", args.output);
        return Ok(());
    }

    let mut graph = ExprGraph::new();
    let aoi = TableRef(graph.invoke("Table.load", [("asset", args.aoi.as_str().into())]));

    let image = match datasets.as_slice() {
        [single] => {
            build_composite(
                &mut graph,
                client,
                single,
                aoi,
                &args.start,
                &args.end,
                &options,
            )
            .await?
        }
        several => {
            build_merged_composite(
                &mut graph,
                client,
                several,
                aoi,
                &args.start,
                &args.end,
                &options,
            )
            .await?
        }
    };

    let region = RegionRef(graph.invoke("Table.geometry", [("table", aoi.into())]));
    let params = ImageExportParams::to_asset(&checks::description_from_path(&args.output), &args.output)
        .region(region)
        .scale(Some(args.scale))
        .crs(args.crs.clone());
    let task = client.export_image(&graph, image.node(), &params).await?;
    info!(%task, asset = args.output.as_str(), "export started (asset)");

    Ok(())
}
