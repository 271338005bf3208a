use clap::{Parser, Subcommand};

mod cmd;
mod os_signals;

#[derive(Parser)]
#[command(name = "pulsarbeat", about = "Pump messages from a broker subscription into an event sink")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and pump until SIGINT/SIGTERM.
    Run(cmd::run::RunArgs),
    /// Load and validate the configuration, then exit.
    CheckConfig(cmd::check::CheckArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => cmd::run::execute(args).await,
        Commands::CheckConfig(args) => cmd::check::execute(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "pulsarbeat failed");
        std::process::exit(1);
    }
}
