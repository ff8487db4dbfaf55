pub mod agents;
pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use vigil_core::config::ConfigOverrides;

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    about = "Vigil operator CLI",
    long_about = "Chat with guarded health agents, inspect configuration, and check readiness.",
    after_help = "Examples:\n  vigil chat\n  vigil config\n  vigil doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this file instead of vigil.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive session; type exit, quit or bye to leave")]
    Chat {
        #[arg(long, help = "Override the configured log level for this session")]
        log_level: Option<String>,
        #[arg(long, help = "Override the configured backend model")]
        model: Option<String>,
        #[arg(long, help = "Abandon a turn after this many seconds; 0 waits indefinitely")]
        run_timeout_secs: Option<u64>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, backend credentials, and backend reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Command::Chat { log_level, model, run_timeout_secs } => {
            let overrides = ConfigOverrides { log_level, llm_model: model, run_timeout_secs };
            commands::chat::run(config_path, overrides)
        }
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(config_path.as_deref()),
        },
        Command::Doctor { json } => commands::doctor::run(config_path.as_deref(), json),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
