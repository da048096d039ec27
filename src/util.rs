//! Small shared primitives: name sanitization, content hashing, token
//! estimation, store discovery, timestamps.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::RagError;

/// Directory name of the store root.
pub const STORE_DIR_NAME: &str = ".ragdag";

/// Environment variable overriding cwd-ancestor store discovery.
pub const STORE_ENV: &str = "RAGDAG_STORE";

/// Lowercase the input and keep only `[a-z0-9._-]`.
///
/// Used for domain and document directory names so that every node path is
/// shell- and filesystem-safe.
pub fn sanitize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|&c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// SHA-256 of a file's raw bytes as lowercase hex, streamed in 8 KiB reads.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Approximate token count: `words * 13 / 10` in integer arithmetic.
///
/// Only used for context budgeting; the exact formula is part of the
/// on-disk contract because budgets must be reproducible.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 13 / 10
}

/// Current UTC time as `YYYY-MM-DDThh:mm:ssZ`.
pub fn iso_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Locate the store root (`.ragdag/`) for a starting directory.
///
/// `RAGDAG_STORE` takes precedence: its child `.ragdag/` is used without any
/// ancestor walk. Otherwise every ancestor of `start` is checked in turn.
pub fn find_store(start: &Path) -> Result<PathBuf, RagError> {
    if let Ok(base) = std::env::var(STORE_ENV) {
        let candidate = PathBuf::from(base).join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        return Err(RagError::NotAStore(candidate));
    }

    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(STORE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        dir = d.parent();
    }
    Err(RagError::NotAStore(start.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_lowercases_and_filters() {
        assert_eq!(sanitize("My Report (Final).md"), "myreportfinal.md");
        assert_eq!(sanitize("notes_2024-01"), "notes_2024-01");
    }

    #[test]
    fn test_sanitize_empty_and_all_special() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("!@#$%^&*()"), "");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for input in ["Hello World.TXT", "a/b\\c", "Ünïcode-ok"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 3); // 3 * 13 / 10
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
    }

    #[test]
    fn test_hash_file_matches_known_digest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_find_store_walks_ancestors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = tmp.path().join(STORE_DIR_NAME);
        std::fs::create_dir(&store).unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_store(&nested).unwrap();
        assert_eq!(found, store);
    }

    #[test]
    fn test_find_store_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(find_store(tmp.path()).is_err());
    }
}
