use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use shardfetch::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT, stopping after the current sub-blocks");
            signal_token.cancel();
        }
    });

    match cli::run(args, cancel).await {
        Ok(stats) => ExitCode::from(cli::exit_code(&stats)),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
