//! Inspect command implementation.

use super::parse_key;
use crate::error::{CliError, CliResult};
use crate::OutputFormat;
use confinedb_storage::{inspect_file, StoreInfo};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Format version from the header.
    pub format_version: u16,
    /// Whether the body is encrypted.
    pub encrypted: bool,
    /// Commit version of the stored snapshot.
    pub version: u64,
    /// Number of entries, when the body could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
}

impl InspectResult {
    fn new(path: &Path, info: StoreInfo) -> Self {
        Self {
            path: path.display().to_string(),
            size: info.size,
            format_version: info.format_version,
            encrypted: info.encrypted,
            version: info.version,
            entries: info.entries,
        }
    }
}

/// Reads the header of the store at `path` and, given the key, its body.
pub fn inspect(path: &Path, key_hex: Option<&str>) -> CliResult<InspectResult> {
    if !path.is_file() {
        return Err(CliError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let key = key_hex.map(parse_key).transpose()?;
    let info = inspect_file(path, key.as_ref())?;
    Ok(InspectResult::new(path, info))
}

/// Runs the inspect command.
pub fn run(path: &Path, key_hex: Option<&str>, format: OutputFormat) -> CliResult<()> {
    let result = inspect(path, key_hex)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("ConfineDB Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("File:");
    println!("  Size:           {}", format_size(result.size));
    println!("  Format version: {}", result.format_version);
    println!(
        "  Encrypted:      {}",
        if result.encrypted { "yes" } else { "no" }
    );
    println!();
    println!("Snapshot:");
    println!("  Version: {}", result.version);
    match result.entries {
        Some(entries) => println!("  Entries: {}", entries),
        None => println!("  Entries: (encrypted, pass --key-hex to count)"),
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confinedb_core::{Configuration, Runtime, ThreadToken, KEY_SIZE};
    use confinedb_storage::SnapshotEngine;
    use tempfile::tempdir;

    fn write_store(path: &Path, key: Option<Vec<u8>>) {
        let mut builder = Configuration::builder(path);
        if let Some(key) = key {
            builder = builder.encryption_key(key);
        }
        let config = builder.build().unwrap();
        let runtime = Runtime::new(SnapshotEngine::new());
        let me = ThreadToken::simulated();
        let db = runtime.open(me, &config).unwrap();
        db.write(me, |db| {
            db.put(me, b"a", b"1")?;
            db.put(me, b"b", b"2")
        })
        .unwrap();
        db.close(me).unwrap();
    }

    #[test]
    fn inspects_plain_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.cdb");
        write_store(&path, None);

        let result = inspect(&path, None).unwrap();
        assert!(!result.encrypted);
        assert_eq!(result.version, 1);
        assert_eq!(result.entries, Some(2));
    }

    #[test]
    fn encrypted_store_needs_key_for_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sealed.cdb");
        write_store(&path, Some(vec![0x42; KEY_SIZE]));

        let without = inspect(&path, None).unwrap();
        assert!(without.encrypted);
        assert_eq!(without.entries, None);

        let with = inspect(&path, Some(&"42".repeat(KEY_SIZE))).unwrap();
        assert_eq!(with.entries, Some(2));

        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("entries").is_none());
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempdir().unwrap();
        let err = inspect(&dir.path().join("absent.cdb"), None).unwrap_err();
        assert!(matches!(err, CliError::NotFound { .. }));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
