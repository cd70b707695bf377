use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orchestra", version, about = "Dispatch natural-language commands to a pool of coding-assistant agents")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator with its HTTP API
    Serve(ServeArgs),
    /// Execute a single command on a local agent and exit
    Run(RunArgs),
    /// List live agent processes on this machine
    Discover(DiscoverArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Listen port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Listen address (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    pub db: Option<String>,

    /// Do not scan for live agent processes
    #[arg(long)]
    pub no_discovery: bool,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Natural-language command for the agent
    pub command: String,

    /// Repository the agent works in
    #[arg(short, long, default_value = ".")]
    pub repo: String,

    /// low, normal, high or critical
    #[arg(short, long, default_value = "normal")]
    pub priority: String,

    /// Hard timeout in seconds (overrides config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct DiscoverArgs {
    /// Agent executable to look for (overrides config)
    #[arg(long)]
    pub executable: Option<String>,

    /// Resolve connection parameters for one session id
    #[arg(long)]
    pub session: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub config: String,
}
