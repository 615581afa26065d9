#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use holoroom_relay::{server, RelayConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::parse();

    holoroom_common::init_tracing_with_default(&format!(
        "holoroom_relay={},tower_http=info",
        config.log_level
    ));

    config.check_public_bind_allowed()?;

    info!("starting holoroom-relay v{}", env!("CARGO_PKG_VERSION"));
    server::run(config).await
}
