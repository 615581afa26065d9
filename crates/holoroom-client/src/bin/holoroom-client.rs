#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use holoroom_client::{runtime, ClientConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::parse();

    holoroom_common::init_tracing_with_default(&format!(
        "holoroom_client={},webrtc=warn",
        config.log_level
    ));

    info!("starting holoroom-client v{}", env!("CARGO_PKG_VERSION"));
    runtime::run(config).await
}
