mod cli;
mod rpc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
