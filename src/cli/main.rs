//! CLI binary entry point for agol-reporter

#[cfg(feature = "cli")]
use agol_reporter::cli::commands::init_config::handle_init_config;
#[cfg(feature = "cli")]
use agol_reporter::cli::commands::metatable::handle_metatable;
#[cfg(feature = "cli")]
use agol_reporter::cli::commands::run::{RunArgs, handle_run};
#[cfg(feature = "cli")]
use agol_reporter::config::{CONFIG_FILENAME, OutputFormat};
#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "agol-reporter")]
#[command(about = "Usage and inventory reports for AGOL hosted feature services")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Build and save the hosted feature service usage report
    Run {
        /// Configuration file
        #[arg(short, long, default_value = CONFIG_FILENAME)]
        config: PathBuf,
        /// Output format, overrides the configuration file
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
        /// Report directory, overrides the configuration file
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Read the SGID and shelved metatables and list duplicate item ids
    Metatable {
        /// Configuration file
        #[arg(short, long, default_value = CONFIG_FILENAME)]
        config: PathBuf,
    },
    /// Write a sample configuration file
    InitConfig {
        /// Where to write the configuration
        #[arg(default_value = CONFIG_FILENAME)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Log,
}

#[cfg(feature = "cli")]
impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Log => OutputFormat::Log,
        }
    }
}

#[cfg(feature = "cli")]
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[cfg(feature = "cli")]
fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            config,
            format,
            out_dir,
        } => handle_run(&RunArgs {
            config: config.clone(),
            format: format.map(OutputFormat::from),
            out_dir,
        })
        .with_context(|| format!("Usage report run with {} failed", config.display())),
        Commands::Metatable { config } => handle_metatable(&config)
            .with_context(|| format!("Reading metatables from {} failed", config.display())),
        Commands::InitConfig { path, force } => Ok(handle_init_config(&path, force)?),
    }
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(cli.command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
