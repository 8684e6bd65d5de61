use clap::{Parser, Subcommand};
use colored::Colorize;
use memory_bank::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memory-bank")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent project memory for coding agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the skill, slash commands and plugin config into OpenCode
    Install {
        /// Model for the memory-reader agent (overrides the existing setting)
        #[arg(long)]
        model: Option<String>,
    },

    /// Check the installation
    Doctor,

    /// Agent-runtime hook entry points
    #[command(subcommand)]
    Hook(memory_bank::cli::hook::HookCommands),
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run_async(cli)) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn init_tracing() {
    let default = if std::env::var("MEMORY_BANK_DEBUG").as_deref() == Ok("1") {
        "memory_bank=debug"
    } else {
        "memory_bank=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_async(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install { model } => {
            println!(
                "{}",
                format!("📦 Installing Memory Bank v{}...", env!("CARGO_PKG_VERSION")).cyan()
            );
            memory_bank::cli::install::run(model)?;
        }

        Commands::Doctor => {
            memory_bank::cli::doctor::run()?;
        }

        Commands::Hook(cmd) => {
            memory_bank::cli::hook::run(cmd).await?;
        }
    }

    Ok(())
}
