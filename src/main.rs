use clap::Parser;
use login_flow_explorer::cli::commands::{cmd_crawl, cmd_explore};
use login_flow_explorer::cli::config::{Cli, Commands, load_config};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // CLI > config file > defaults
    let config = load_config(cli.config.as_deref()).apply_cli(&cli);

    let summary = match cli.command {
        Commands::Crawl { urls, output_dir } => {
            let config = config.with_output_dir(output_dir);
            cmd_crawl(&urls, &config).await?
        }
        Commands::Explore { url, output_dir } => {
            let config = config.with_output_dir(output_dir);
            cmd_explore(&url, &config).await?
        }
    };

    if summary.all_failed() {
        std::process::exit(1);
    }
    Ok(())
}
