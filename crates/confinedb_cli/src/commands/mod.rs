//! CLI command implementations.

pub mod copy;
pub mod inspect;

use crate::error::{CliError, CliResult};
use confinedb_storage::{EncryptionKey, KEY_SIZE};

/// Parses a 64-byte key given as 128 hex digits.
pub fn parse_key_hex(hex: &str) -> CliResult<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() != KEY_SIZE * 2 {
        return Err(CliError::KeyLength {
            expected: KEY_SIZE * 2,
            actual: hex.len(),
        });
    }

    hex.as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            let digit = |b: u8, at: usize| {
                (b as char)
                    .to_digit(16)
                    .ok_or(CliError::KeyDigit { position: at })
            };
            Ok((digit(pair[0], i * 2)? << 4 | digit(pair[1], i * 2 + 1)?) as u8)
        })
        .collect()
}

/// Parses a hex key into an engine key.
pub fn parse_key(hex: &str) -> CliResult<EncryptionKey> {
    let bytes = parse_key_hex(hex)?;
    Ok(EncryptionKey::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_length_key() {
        let hex = "0f".repeat(KEY_SIZE);
        assert_eq!(parse_key_hex(&hex).unwrap(), vec![0x0f; KEY_SIZE]);

        let upper = "A1".repeat(KEY_SIZE);
        assert_eq!(parse_key_hex(&upper).unwrap(), vec![0xa1; KEY_SIZE]);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = parse_key_hex("abcd").unwrap_err();
        assert!(matches!(err, CliError::KeyLength { actual: 4, .. }));
    }

    #[test]
    fn reports_first_bad_digit() {
        let mut hex = "00".repeat(KEY_SIZE);
        hex.replace_range(5..6, "g");
        let err = parse_key_hex(&hex).unwrap_err();
        assert!(matches!(err, CliError::KeyDigit { position: 5 }));
    }
}
