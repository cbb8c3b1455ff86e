mod cli;

use clap::Parser;
use tracing::{debug, error, info};
use wgwarden_core::logging;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let settings = cli::load_settings(args.settings_path());

    // Initialize logging from the flags and, when it loaded, the settings file
    let guard = logging::init_logging(args.log_options(settings.as_ref().ok()));

    info!("Starting wgwarden");
    debug!("Initializing CLI");

    let result = match settings {
        Ok(settings) => cli::run(args, settings).await,
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        error!("wgwarden error: {}", err);
        drop(guard);
        std::process::exit(1);
    }
}
