#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use umbress_lib::config::load_from_path;
use umbress_lib::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about = "umbress: request admission firewall and reverse proxy")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "UMBRESS_CONFIG", default_value = "umbress.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            if init_tracing("info", false).is_ok() {
                error!(%err, path = %cli.config.display(), "failed to load configuration");
            } else {
                eprintln!("failed to load configuration: {err}");
            }
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging.level, cfg.logging.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    info!(listen = %cfg.listen, upstream = %cfg.upstream.address, "configuration loaded");
    if let Err(err) = umbress_lib::run(Arc::new(cfg)).await {
        error!(%err, "umbress exited with error");
        std::process::exit(1);
    }
}
