//! Decodes the catalog's packed `lstat` field.
//!
//! Bareos packs a `struct stat` plus a "LinkFI" (the file-index of a
//! hardlink's chain head, zero if this record *is* the head) into a
//! base64-encoded blob. We only need three fields out of it for tree
//! building: `nlink`, `st_mode`, and `LinkFI`. Everything else in the blob
//! is opaque to this crate and round-tripped as-is where callers need to
//! pass lstat through unexamined.

use anyhow::{Context, Result};
use base64::Engine;

const ENCODED_LEN: usize = 16; // 4 (mode) + 4 (nlink) + 8 (LinkFI), little-endian.

/// The handful of `lstat` fields the tree builder actually consults.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DecodedLstat {
    pub mode: u32,
    pub nlink: u32,
    pub link_fi: i64,
}

const S_IFLNK: u32 = 0o120000;
const S_IFMT: u32 = 0o170000;

impl DecodedLstat {
    #[inline]
    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFMT) == S_IFLNK
    }
}

/// Decode the base64-packed `lstat` catalog field.
///
/// Returns `Err` for anything that isn't a validly-encoded, correctly-sized
/// blob -- the caller treats this as an unrecoverable row and
/// aborts ingestion.
pub fn decode(encoded: &str) -> Result<DecodedLstat> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("lstat field wasn't valid base64")?;
    anyhow::ensure!(
        bytes.len() == ENCODED_LEN,
        "lstat field decoded to {} bytes, expected {ENCODED_LEN}",
        bytes.len()
    );

    let mode = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let nlink = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let link_fi = i64::from_le_bytes(bytes[8..16].try_into().unwrap());

    Ok(DecodedLstat {
        mode,
        nlink,
        link_fi,
    })
}

/// Encode an `lstat` blob -- used by tests and by callers synthesizing
/// catalog rows (e.g. the demo binary's in-memory catalog).
pub fn encode(lstat: DecodedLstat) -> String {
    let mut bytes = [0u8; ENCODED_LEN];
    bytes[0..4].copy_from_slice(&lstat.mode.to_le_bytes());
    bytes[4..8].copy_from_slice(&lstat.nlink.to_le_bytes());
    bytes[8..16].copy_from_slice(&lstat.link_fi.to_le_bytes());
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let original = DecodedLstat {
            mode: 0o100644,
            nlink: 2,
            link_fi: 0,
        };
        let encoded = encode(original);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn symlink_detection() {
        let link = DecodedLstat {
            mode: 0o120777,
            nlink: 1,
            link_fi: 0,
        };
        assert!(link.is_symlink());
        let reg = DecodedLstat {
            mode: 0o100644,
            nlink: 1,
            link_fi: 0,
        };
        assert!(!reg.is_symlink());
    }

    #[test]
    fn malformed_is_rejected() {
        assert!(decode("not valid base64!!!").is_err());
        assert!(decode(&base64::engine::general_purpose::STANDARD.encode(b"short")).is_err());
    }
}
