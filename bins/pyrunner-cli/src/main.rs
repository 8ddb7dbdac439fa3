mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyrunner-cli")]
#[command(about = "pyrunner CLI - Run scripts in a throwaway sandbox and manage runner config", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script locally through the sandbox pipeline
    Run {
        /// Script file to execute
        #[arg(short, long)]
        script: PathBuf,

        /// Files to place next to the script (repeatable)
        #[arg(short, long)]
        attach: Vec<PathBuf>,

        /// Override the configured wall-clock limit
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Runner config file (defaults to config/runner.json when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the accepted attachment formats
    Formats {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default config/runner.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so script output stays clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            attach,
            timeout_ms,
            config,
        } => {
            let code = commands::run_script(&script, &attach, timeout_ms, config.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Formats { config } => {
            commands::print_formats(config.as_deref())?;
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
    }

    Ok(())
}
