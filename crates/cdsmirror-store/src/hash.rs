//! Blake3 hashing utilities for artifact checksums

use std::io;
use std::path::Path;

/// Hash a file's contents with blake3.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

/// Hash raw bytes with blake3.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// First 8 hex characters of a hex digest (display only).
pub fn short_hash(hex: &str) -> &str {
    &hex[..hex.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn short_hash_length() {
        let h = hash_bytes(b"test").to_hex().to_string();
        assert_eq!(short_hash(&h).len(), 8);
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2020.grib");
        std::fs::write(&path, b"GRIB payload").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"GRIB payload"));
    }
}
