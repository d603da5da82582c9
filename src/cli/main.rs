//! CLI binary entry point for docload

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use docload::cli::commands::run::{RunArgs, handle_run};
#[cfg(feature = "cli")]
use docload::cli::commands::sample::{SampleKind, handle_sample_config};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "docload")]
#[command(about = "Load document collections into PostgreSQL tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Load an input batch into the configured database
    Run {
        /// Path to the input JSON file
        #[arg(long)]
        input: PathBuf,
        /// Path to the application config file
        #[arg(long)]
        app_config: PathBuf,
        /// Path to the mapping config file
        #[arg(long)]
        mapping_config: PathBuf,
        /// Also write the run summary as JSON to this file
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
    /// Print a sample configuration file
    SampleConfig {
        /// Which configuration file to generate
        #[arg(value_enum, default_value = "app")]
        kind: SampleKindArg,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum SampleKindArg {
    App,
    Mapping,
}

#[cfg(feature = "cli")]
impl From<SampleKindArg> for SampleKind {
    fn from(kind: SampleKindArg) -> Self {
        match kind {
            SampleKindArg::App => SampleKind::App,
            SampleKindArg::Mapping => SampleKind::Mapping,
        }
    }
}

#[cfg(feature = "cli")]
fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            input,
            app_config,
            mapping_config,
            summary_json,
        } => {
            let args = RunArgs {
                input,
                app_config,
                mapping_config,
                summary_json,
            };
            let summary = handle_run(&args)?;
            eprintln!(
                "Loaded {} document(s): {} successful, {} with errors, {} insert failure(s)",
                summary.total_documents,
                summary.successful_documents,
                summary.documents_with_errors,
                summary.insert_failures
            );
        }
        Commands::SampleConfig { kind, output } => {
            handle_sample_config(kind.into(), output.as_deref())?;
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    if let Err(e) = execute(cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
