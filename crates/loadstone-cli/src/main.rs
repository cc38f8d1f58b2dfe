mod help;
mod logging;
mod options;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use loadstone_engine::Settings;
use runner::Operation;

#[derive(Parser)]
#[command(
    name = "loadstone",
    version,
    about = "Bulk data transfer between files and CQL tables",
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print version information
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Settings file (YAML), merged under command-line options
    #[arg(short = 'f', long = "config-file", global = true)]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load records from files into a table
    Load {
        /// Dotted-key options, e.g. --connector.csv.url data/ -k ks1 -t t1
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Unload a table into files
    Unload {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Count rows in a table
    Count {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Describe settings sections and their keys
    Help {
        /// Settings section, e.g. `codec`
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let (operation, raw_options) = match cli.command {
        Commands::Load { options } => (Operation::Load, options),
        Commands::Unload { options } => (Operation::Unload, options),
        Commands::Count { options } => (Operation::Count, options),
        Commands::Help { section } => {
            return match help::section_help(section.as_deref()) {
                Ok(text) => {
                    print!("{text}");
                    ExitCode::from(0)
                }
                Err(message) => {
                    eprintln!("{message}");
                    ExitCode::from(3)
                }
            };
        }
    };

    let overrides = match options::parse_pairs(&raw_options) {
        Ok(pairs) => pairs,
        Err(error) => {
            tracing::error!("{error}");
            return ExitCode::from(3);
        }
    };
    let settings = match Settings::load(cli.config_file.as_deref(), &overrides) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::error!("{error}");
            return ExitCode::from(3);
        }
    };

    let outcome = runner::run(operation, settings).await;
    ExitCode::from(outcome.exit_code() as u8)
}
