use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use navlens::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for navlens::AppCommand {
    fn from(cmd: Commands) -> navlens::AppCommand {
        match cmd {
            Commands::Funds => navlens::AppCommand::Funds,
            Commands::Compare {
                series,
                start,
                end,
                rows,
                json,
            } => navlens::AppCommand::Compare {
                series,
                start,
                end,
                rows,
                json,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// List the fund series loaded from the seed file
    Funds,
    /// Compare funds rebased to a common baseline
    Compare {
        /// Fund codes or series names to compare
        #[arg(required = true)]
        series: Vec<String>,

        /// Only show points on or after this date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Only show points on or before this date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Maximum rows in the value table; 0 shows every date
        #[arg(long, default_value_t = 12)]
        rows: usize,

        /// Print the normalized series as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => navlens::cli::setup::setup(),
        Some(cmd) => navlens::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
