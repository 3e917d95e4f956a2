//! Nectar CLI - inspect and evaluate functions exported by foreign modules.

mod eval;
mod info;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nectar_core::{ModuleRegistry, RetryPolicy, SearchPath};

#[derive(Parser)]
#[command(name = "nectar")]
#[command(about = "Evaluate functions exported by dynamic modules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the declared dimensions and description of a function
    Info {
        /// Module name or path
        #[arg(short, long)]
        module: String,

        /// Logical function name
        #[arg(short, long)]
        function: String,

        /// Extra directory searched for modules (repeatable)
        #[arg(long = "search-dir")]
        search_dirs: Vec<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a batch of points read as a JSON array of rows
    Eval {
        /// Module name or path
        #[arg(short, long)]
        module: String,

        /// Logical function name
        #[arg(short, long)]
        function: String,

        /// Extra directory searched for modules (repeatable)
        #[arg(long = "search-dir")]
        search_dirs: Vec<PathBuf>,

        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// JSON configuration file (default: NECTAR_* environment variables)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Evaluate with this many worker sessions
        #[arg(short, long)]
        workers: Option<usize>,

        /// Evaluate the batch this many times against the same cache
        #[arg(long, default_value = "1")]
        repeat: usize,
    },
}

/// Registry searching `search_dirs` first, then the environment defaults.
fn open_registry(search_dirs: &[PathBuf], retry: RetryPolicy) -> ModuleRegistry {
    let mut search = SearchPath::new(search_dirs);
    for dir in SearchPath::from_env().dirs() {
        search.push(dir);
    }
    ModuleRegistry::new(search, retry)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format nectar-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(nectar_err) = err.downcast_ref::<nectar_core::Error>() {
            anyhow::anyhow!("{}", nectar_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Info {
            module,
            function,
            search_dirs,
            json,
        } => {
            info::execute(&module, &function, &search_dirs, json).map_err(format_error)?;
        }

        Commands::Eval {
            module,
            function,
            search_dirs,
            input,
            config,
            workers,
            repeat,
        } => {
            let options = eval::EvalOptions {
                module: &module,
                function: &function,
                search_dirs: &search_dirs,
                input: input.as_deref(),
                config: config.as_deref(),
                workers,
                repeat,
            };
            eval::execute(&options).map_err(format_error)?;
        }
    }

    Ok(())
}
