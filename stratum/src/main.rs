mod command;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::log_setup::setup_logging("info");
    command::run().await
}
