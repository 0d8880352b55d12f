use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use tinysip::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = Config::parse();
    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}
