use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose());

    if let Err(e) = run(cli) {
        cli::report_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config_path().clone();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;

    runtime
        .block_on(cli.execute())
        .with_context(|| format!("Settings file {}", config.display()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
