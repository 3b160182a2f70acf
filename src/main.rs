//! `cdd` binary entrypoint: logging init, CLI parse, dispatch.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use comp_depends_daemon::cli_app;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = cli_app::Cli::parse();
    if let Err(err) = cli_app::run(&cli) {
        eprintln!("cdd: {err}");
        std::process::exit(1);
    }
}
