use std::process::exit;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

use schemaseed::cli::{self, Args};

const DEFAULT_LOG_FILTER: &str = "schemaseed=info,sqlx=warn";

fn prepare_tracing(json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    // Also installs the bridge for `log` records emitted by sqlx
    if json_logs {
        builder.json().init()
    } else {
        builder.init()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    prepare_tracing(args.json_logs);

    info!("Starting schemaseed {}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = cli::run(&args).await {
        error!("{err}");
        eprintln!("Error: {err}");
        exit(1);
    }
}
