pub(crate) mod cli;
pub(crate) mod cluster;
pub(crate) mod dedup;
pub(crate) mod enrich;
mod error;
pub(crate) mod io_utils;
mod logging;
pub(crate) mod report;
pub(crate) mod serde_helpers;
pub(crate) mod store;
pub(crate) mod time_utils;
pub(crate) mod whatsapp;

pub(crate) use error::{AppError, AppResult};

use clap::Parser;
use tracing::error;

use crate::cli::GetVerbosity;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    logging::setup_logger(cli.cmd.get_verbosity().tracing_level_filter());
    if let Err(e) = cli.cmd.run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
