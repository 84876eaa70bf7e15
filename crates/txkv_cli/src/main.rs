//! txkv CLI
//!
//! Command-line tools for txkv stores.
//!
//! # Commands
//!
//! - `put` / `get` / `remove` - Single-key autocommit operations
//! - `stress` - Run the contention workload and report lock outcomes
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use txkv_core::ConcurrencyMode;
use tracing_subscriber::EnvFilter;

/// txkv command-line tools.
#[derive(Parser)]
#[command(name = "txkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory (in-memory if omitted)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Concurrency mode (none, optw, optrw, pesw, pesrw)
    #[arg(global = true, short, long, default_value = "pesrw")]
    mode: ConcurrencyMode,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value under a key
    Put {
        /// Key
        key: String,
        /// Value
        value: String,
    },

    /// Print the value stored under a key
    Get {
        /// Key
        key: String,
    },

    /// Remove a key
    Remove {
        /// Key
        key: String,
    },

    /// Run concurrent increment transactions and report lock outcomes
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transactions per thread
        #[arg(short, long, default_value = "1000")]
        ops: usize,

        /// Number of counter keys
        #[arg(short, long, default_value = "8")]
        keys: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.as_deref();
    match cli.command {
        Commands::Put { key, value } => {
            commands::kv::put(path, cli.mode, &key, &value)?;
        }
        Commands::Get { key } => {
            commands::kv::get(path, cli.mode, &key)?;
        }
        Commands::Remove { key } => {
            commands::kv::remove(path, cli.mode, &key)?;
        }
        Commands::Stress {
            threads,
            ops,
            keys,
            format,
        } => {
            commands::stress::run(path, cli.mode, threads, ops, keys, &format)?;
        }
        Commands::Version => {
            println!("txkv CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txkv Core v{}", txkv_core::VERSION);
        }
    }

    Ok(())
}
