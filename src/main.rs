use clap::Parser;
use decaychain::api::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve { port } => {
            if let Err(e) = decaychain::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Run(args) => {
            // Trials are CPU bound; keep them off the async worker threads.
            let outcome = tokio::task::spawn_blocking(move || decaychain::api::run_cli(args)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Simulation task failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
