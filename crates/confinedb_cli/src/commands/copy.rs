//! Copy command implementation.
//!
//! Opens the source through a [`Runtime`], taking the store's file lock like
//! any other client.

use super::parse_key_hex;
use crate::error::{CliError, CliResult};
use confinedb_core::{Configuration, Runtime, ThreadToken};
use confinedb_storage::SnapshotEngine;
use std::path::Path;
use tracing::info;

/// Writes a compact copy of `source` to `destination`.
///
/// `key_hex` opens an encrypted source; `dest_key_hex` encrypts the copy.
/// Without `dest_key_hex` the copy is written in plain form.
pub fn copy(
    source: &Path,
    destination: &Path,
    key_hex: Option<&str>,
    dest_key_hex: Option<&str>,
) -> CliResult<()> {
    if !source.is_file() {
        return Err(CliError::NotFound {
            path: source.to_path_buf(),
        });
    }

    let mut builder = Configuration::builder(source);
    if let Some(hex) = key_hex {
        builder = builder.encryption_key(parse_key_hex(hex)?);
    }
    let config = builder.build()?;
    let dest_key = dest_key_hex.map(parse_key_hex).transpose()?;

    let runtime = Runtime::new(SnapshotEngine::new());
    let me = ThreadToken::current();
    let db = runtime.open(me, &config)?;

    let result = match &dest_key {
        Some(key) => db.write_encrypted_copy_to(me, destination, key),
        None => db.write_copy_to(me, destination),
    };
    let version = db.version(me);
    db.close(me)?;
    result?;

    info!(
        source = %config.path().display(),
        destination = %destination.display(),
        encrypted = dest_key.is_some(),
        "copied store"
    );
    print_summary(destination, version?, dest_key.is_some());
    Ok(())
}

/// Runs the copy command.
pub fn run(
    source: &Path,
    destination: &Path,
    key_hex: Option<&str>,
    dest_key_hex: Option<&str>,
) -> CliResult<()> {
    copy(source, destination, key_hex, dest_key_hex)
}

fn print_summary(destination: &Path, version: u64, encrypted: bool) {
    println!("✓ Copy written");
    println!("  Path: {}", destination.display());
    println!("  Version: {}", version);
    println!("  Encrypted: {}", if encrypted { "yes" } else { "no" });
}
