//! On-disk store image.
//!
//! A persisted store is a single file rewritten atomically on every commit:
//!
//! ```text
//! | magic (4) | format (2) | flags (1) | version (8) | body (N) | crc32 (4) |
//! ```
//!
//! The body is `count (4)` followed by `count` entries of
//! `key_len (4) | key | value_len (4) | value`. When flag bit 0 is set the
//! body is sealed with AES-256-GCM. The CRC covers everything before it.

use crate::crypto::{EncryptionKey, StoreCipher};
use crate::error::{EngineError, EngineResult};
use crate::snapshot::Snapshot;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for store files.
const STORE_MAGIC: [u8; 4] = *b"CFDB";
/// Current store format version.
pub const FORMAT_VERSION: u16 = 1;
/// Header size (magic + format + flags + version).
const HEADER_SIZE: usize = 4 + 2 + 1 + 8;
/// Footer size (checksum).
const FOOTER_SIZE: usize = 4;
/// Flag bit: body is encrypted.
const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// Summary of a store file, as reported by [`inspect_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Format version from the header.
    pub format_version: u16,
    /// Whether the body is encrypted.
    pub encrypted: bool,
    /// Commit version of the stored snapshot.
    pub version: u64,
    /// Number of entries, if the body could be read.
    pub entries: Option<usize>,
    /// File size in bytes.
    pub size: u64,
}

struct Header {
    format_version: u16,
    encrypted: bool,
    version: u64,
}

/// Serializes a snapshot, sealing the body when a cipher is given.
pub(crate) fn encode(snapshot: &Snapshot, cipher: Option<&StoreCipher>) -> EngineResult<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(&(snapshot.len() as u32).to_le_bytes());
    for (key, value) in snapshot.entries() {
        body.extend_from_slice(&(key.len() as u32).to_le_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(&(value.len() as u32).to_le_bytes());
        body.extend_from_slice(value);
    }

    let (flags, body) = match cipher {
        Some(cipher) => (FLAG_ENCRYPTED, cipher.seal(&body)?),
        None => (0, body),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + FOOTER_SIZE);
    out.extend_from_slice(&STORE_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(flags);
    out.extend_from_slice(&snapshot.version().to_le_bytes());
    out.extend_from_slice(&body);
    let crc = compute_crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Parses a store image.
///
/// `path` is only used to label key errors.
pub(crate) fn decode(
    path: &Path,
    data: &[u8],
    cipher: Option<&StoreCipher>,
) -> EngineResult<Snapshot> {
    let (header, body) = split(data)?;

    let plaintext = match (header.encrypted, cipher) {
        (true, Some(cipher)) => cipher.open(body).ok_or_else(|| EngineError::wrong_key(path))?,
        (false, None) => body.to_vec(),
        // Key presence must match how the file was written
        _ => return Err(EngineError::wrong_key(path)),
    };

    let entries = decode_entries(&plaintext)?;
    Ok(Snapshot::new(header.version, entries))
}

/// Validates framing and returns the header and raw body.
fn split(data: &[u8]) -> EngineResult<(Header, &[u8])> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(EngineError::corrupted("store file too small"));
    }
    if data[0..4] != STORE_MAGIC {
        return Err(EngineError::corrupted("invalid magic bytes"));
    }

    let crc_offset = data.len() - FOOTER_SIZE;
    let stored_crc = u32::from_le_bytes(slice_to_array_4(&data[crc_offset..]));
    let actual_crc = compute_crc32(&data[..crc_offset]);
    if stored_crc != actual_crc {
        return Err(EngineError::corrupted(format!(
            "checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
        )));
    }

    let format_version = u16::from_le_bytes([data[4], data[5]]);
    if format_version > FORMAT_VERSION {
        return Err(EngineError::IncompatibleVersion {
            found: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let header = Header {
        format_version,
        encrypted: data[6] & FLAG_ENCRYPTED != 0,
        version: u64::from_le_bytes(slice_to_array_8(&data[7..15])),
    };
    Ok((header, &data[HEADER_SIZE..crc_offset]))
}

fn decode_entries(body: &[u8]) -> EngineResult<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut pos = 0;
    let count = read_u32(body, &mut pos)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = read_chunk(body, &mut pos)?;
        let value = read_chunk(body, &mut pos)?;
        entries.insert(key, value);
    }
    if pos != body.len() {
        return Err(EngineError::corrupted("trailing bytes after entries"));
    }
    Ok(entries)
}

fn read_u32(data: &[u8], pos: &mut usize) -> EngineResult<u32> {
    let end = *pos + 4;
    if end > data.len() {
        return Err(EngineError::corrupted("truncated length field"));
    }
    let value = u32::from_le_bytes(slice_to_array_4(&data[*pos..end]));
    *pos = end;
    Ok(value)
}

fn read_chunk(data: &[u8], pos: &mut usize) -> EngineResult<Vec<u8>> {
    let len = read_u32(data, pos)? as usize;
    let end = pos.saturating_add(len);
    if end > data.len() {
        return Err(EngineError::corrupted("truncated entry"));
    }
    let chunk = data[*pos..end].to_vec();
    *pos = end;
    Ok(chunk)
}

/// Writes `data` to `path` atomically.
///
/// Uses write-then-rename: write a sibling temp file, optionally sync it,
/// rename over the target, then fsync the parent directory.
pub(crate) fn write_atomic(path: &Path, data: &[u8], sync: bool) -> EngineResult<()> {
    let temp_path = temp_path_for(path);
    let published = write_temp(&temp_path, data, sync)
        .and_then(|()| fs::rename(&temp_path, path).map_err(EngineError::from));
    if let Err(err) = published {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if sync {
        sync_parent(path)?;
    }
    Ok(())
}

/// Writes `data` to a new file at `path`, never replacing an existing one.
///
/// The temp file is published with a hard link, which fails if `path`
/// appeared since the caller last looked.
pub(crate) fn write_new(path: &Path, data: &[u8]) -> EngineResult<()> {
    let temp_path = temp_path_for(path);
    let published = write_temp(&temp_path, data, true).and_then(|()| {
        fs::hard_link(&temp_path, path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                EngineError::DestinationExists {
                    path: path.to_path_buf(),
                }
            } else {
                EngineError::from(err)
            }
        })
    });
    let _ = fs::remove_file(&temp_path);
    published?;

    sync_parent(path)
}

fn write_temp(temp_path: &Path, data: &[u8], sync: bool) -> EngineResult<()> {
    let mut file = File::create(temp_path)?;
    file.write_all(data)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> EngineResult<()> {
    // NTFS journals metadata; directory handles can't be fsynced
    Ok(())
}

/// Reads the header of a store file and, when possible, counts its entries.
///
/// Encrypted bodies are only opened when `key` is given.
///
/// # Errors
///
/// Returns an error if the file can't be read, is corrupted, or `key`
/// doesn't open it.
pub fn inspect_file(path: &Path, key: Option<&EncryptionKey>) -> EngineResult<StoreInfo> {
    let data = fs::read(path)?;
    let (header, _) = split(&data)?;

    let entries = match (header.encrypted, key) {
        (true, None) => None,
        (true, Some(key)) => {
            let cipher = StoreCipher::new(key)?;
            Some(decode(path, &data, Some(&cipher))?.len())
        }
        (false, _) => Some(decode(path, &data, None)?.len()),
    };

    Ok(StoreInfo {
        format_version: header.format_version,
        encrypted: header.encrypted,
        version: header.version,
        entries,
        size: data.len() as u64,
    })
}

#[inline]
fn slice_to_array_8(slice: &[u8]) -> [u8; 8] {
    [
        slice[0], slice[1], slice[2], slice[3], slice[4], slice[5], slice[6], slice[7],
    ]
}

#[inline]
fn slice_to_array_4(slice: &[u8]) -> [u8; 4] {
    [slice[0], slice[1], slice[2], slice[3]]
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
