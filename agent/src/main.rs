use clap::Parser as _;

use autobridge_agent::{Cli, inner_main};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    inner_main(Cli::parse()).await
}
