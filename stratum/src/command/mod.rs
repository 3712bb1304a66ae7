use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use platform::client::PlatformClient;
use platform::rest::RestClient;

mod checks;
mod composite;
mod landcover;
mod primitives;
mod sample_pts;

#[derive(Debug, Parser)]
#[command(name = "stratum", version, about = "Land-cover composites, samples and primitives on the remote imagery platform", long_about = None)]
pub struct CommandArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a composite from one or more datasets
    Composite(composite::CompositeArgs),
    /// Generate stratified sample points from a classified image
    SamplePts(sample_pts::SamplePtsArgs),
    /// Extract train/test points from an image within reference locations
    TrainTest(train_test::TrainTestArgs),
    /// Train land-cover primitives for all classes in the training data
    Primitives(primitives::PrimitivesArgs),
    /// Assemble a land-cover image from a primitives collection
    Landcover(landcover::LandcoverArgs),
}

pub async fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();

    // one client for the whole process, injected into every command
    let client = client_from_env()?;

    match &args.command {
        Command::Composite(arg) => composite::run(&client, arg).await?,
        Command::SamplePts(arg) => sample_pts::run(&client, arg).await?,
        Command::TrainTest(arg) => train_test::run(&client, arg).await?,
        Command::Primitives(arg) => primitives::run(&client, arg).await?,
        Command::Landcover(arg) => landcover::run(&client, arg).await?,
    }

    Ok(())
}

fn client_from_env() -> anyhow::Result<Arc<dyn PlatformClient>> {
    let base_url =
        std::env::var("STRATUM_API_URL").context("STRATUM_API_URL is not set")?;
    let token =
        std::env::var("STRATUM_API_TOKEN").context("STRATUM_API_TOKEN is not set")?;
    Ok(Arc::new(RestClient::new(&base_url, &token)))
}
