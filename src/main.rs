mod app;
mod cli;
mod lsp;

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Filter for the harness's own logs. `RUST_LOG` is left to the server.
const LOG_ENV: &str = "LSP_HANDSHAKE_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let config = cli::Cli::from_args().into_config();

    match app::run(config).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
