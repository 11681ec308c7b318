//! Line relay server - Entry Point
//!
//! Parses the command line, binds the listener and serves until Ctrl-C.

use clap::Parser;

use relay_server::{logging, Config, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // Use RUST_LOG env var to control log level
    logging::init();

    // A bind failure ends the process with a non-zero exit
    let server = RelayServer::bind(&config).await?;
    server.run_until_ctrl_c().await?;

    Ok(())
}
