//! csenv CLI: plan and provision a bastion + IDE + search cluster topology.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "csenv",
    version,
    about = "Dependency-ordered planner and provisioner for a bastion, managed IDE, and search cluster network"
)]
struct Cli {
    #[command(subcommand)]
    command: csenv::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("csenv=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = csenv::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
