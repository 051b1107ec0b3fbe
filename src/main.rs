use anyhow::Result;
use log::error;

use rtu_meter::cli::{build_cli, handle_subcommands};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let matches = build_cli().get_matches();

    if let Err(e) = handle_subcommands(&matches).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
