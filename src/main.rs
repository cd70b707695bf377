use clap::Parser;
use tracing_subscriber::EnvFilter;

use orchestra::cli::{self, Cli, Commands};
use orchestra::errors::OrchestraError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .init();
    }

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Serve(args) => cli::serve::handle_serve(args, config).await,
        Commands::Run(args) => cli::run::handle_run(args, config).await,
        Commands::Discover(args) => cli::discover::handle_discover(args, config).await,
        Commands::Validate(args) => cli::validate::handle_validate(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let exit_code = match &e {
            OrchestraError::Config(_) | OrchestraError::Yaml(_) => 2,
            OrchestraError::Validation(_) => 3,
            OrchestraError::AgentUnavailable(_) | OrchestraError::AgentConnection(_) => 4,
            OrchestraError::TaskTimeout { .. } => 5,
            OrchestraError::RepositoryAccess(_) => 6,
            OrchestraError::NotFound(_) => 7,
            _ => 1,
        };
        std::process::exit(exit_code);
    }
}
