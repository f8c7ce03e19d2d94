//! ConfineDB CLI
//!
//! Command-line tools for ConfineDB store files.
//!
//! # Commands
//!
//! - `inspect` - Display store header and entry count
//! - `copy` - Write a compact, optionally re-encrypted copy

mod commands;
mod error;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ConfineDB command-line store tools.
#[derive(Parser)]
#[command(name = "confinedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store header and entry count
    Inspect {
        /// Path to the store file
        path: PathBuf,

        /// Encryption key as 128 hex digits
        #[arg(short, long)]
        key_hex: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a compact copy of a store
    Copy {
        /// Path to the source store file
        source: PathBuf,

        /// Path of the copy (must not exist)
        destination: PathBuf,

        /// Source encryption key as 128 hex digits
        #[arg(short, long)]
        key_hex: Option<String>,

        /// Encrypt the copy with this key (128 hex digits)
        #[arg(short, long)]
        dest_key_hex: Option<String>,
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

    match cli.command {
        Commands::Inspect {
            path,
            key_hex,
            format,
        } => {
            commands::inspect::run(&path, key_hex.as_deref(), format)?;
        }
        Commands::Copy {
            source,
            destination,
            key_hex,
            dest_key_hex,
        } => {
            commands::copy::run(
                &source,
                &destination,
                key_hex.as_deref(),
                dest_key_hex.as_deref(),
            )?;
        }
        Commands::Version => {
            println!("ConfineDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Store format v{}", confinedb_storage::FORMAT_VERSION);
        }
    }

    Ok(())
}
