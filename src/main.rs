use anyhow::Result;

use concar_import::{args, cli};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    cli::main(args::parse()).await
}
