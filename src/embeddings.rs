//! Binary embeddings codec.
//!
//! Per-domain vector storage as two companion files: `embeddings.bin` (a
//! 32-byte little-endian header followed by row-major float32 vectors) and
//! `manifest.tsv` (one row per vector, same order). The fixed header and
//! homogeneous payload make the file memory-map friendly; random access to
//! row `i` is a single offset computation.
//!
//! Header layout (little-endian):
//!
//! | offset | bytes | field |
//! |--------|-------|-------|
//! | 0      | 4     | magic `0x52414744` ("RAGD") |
//! | 4      | 4     | format version |
//! | 8      | 4     | vector dimensions |
//! | 12     | 4     | vector count |
//! | 16     | 8     | model hash (first 8 bytes of SHA-256 of model id) |
//! | 24     | 8     | reserved, zero |

use std::path::Path;

use anyhow::Result;
use memmap2::Mmap;
use sha2::{Digest, Sha256};

use crate::config::write_atomic;
use crate::error::RagError;

pub const MAGIC: u32 = 0x5241_4744;
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;

pub const BIN_FILE: &str = "embeddings.bin";
pub const MANIFEST_FILE: &str = "manifest.tsv";

const MANIFEST_HEADER: &str = "# relative_chunk_path\tindex\tbyte_offset\tdimensions";

/// First 8 bytes of SHA-256 of the model identifier, as a little-endian u64.
pub fn model_hash(model: &str) -> u64 {
    let digest = Sha256::digest(model.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

/// A fully-loaded embedding set: `vectors[i]` belongs to manifest row `i`.
#[derive(Debug)]
pub struct EmbeddingSet {
    pub dimensions: usize,
    pub model_hash: u64,
    pub vectors: Vec<Vec<f32>>,
}

/// Write (or append to) a domain's embedding pair.
///
/// With `append`, an existing valid file with matching version, dimensions,
/// and model hash is extended: incoming chunk paths that are already listed
/// overwrite their existing row, the rest append. Any mismatch or corruption
/// falls back to a fresh file. Both files are written via sibling temp files
/// and rename.
pub fn write_embeddings(
    dir: &Path,
    vectors: &[Vec<f32>],
    chunk_paths: &[String],
    dimensions: usize,
    model: &str,
    append: bool,
) -> Result<()> {
    assert_eq!(vectors.len(), chunk_paths.len());
    let bin_path = dir.join(BIN_FILE);
    let manifest_path = dir.join(MANIFEST_FILE);
    let mhash = model_hash(model);

    let mut all_vectors: Vec<Vec<f32>> = Vec::new();
    let mut all_paths: Vec<String> = Vec::new();

    if append && bin_path.exists() && manifest_path.exists() {
        match (load_embeddings(&bin_path), load_manifest(&manifest_path)) {
            (Ok(existing), Ok(paths))
                if existing.dimensions == dimensions
                    && existing.model_hash == mhash
                    && existing.vectors.len() == paths.len() =>
            {
                all_vectors = existing.vectors;
                all_paths = paths;
            }
            _ => {} // fresh write below
        }
    }

    for (path, vector) in chunk_paths.iter().zip(vectors.iter()) {
        match all_paths.iter().position(|p| p == path) {
            Some(i) => all_vectors[i] = vector.clone(),
            None => {
                all_paths.push(path.clone());
                all_vectors.push(vector.clone());
            }
        }
    }

    if all_vectors.is_empty() {
        return Ok(());
    }

    // Binary payload.
    let count = all_vectors.len();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + count * dimensions * 4);
    bytes.extend_from_slice(&MAGIC.to_le_bytes());
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dimensions as u32).to_le_bytes());
    bytes.extend_from_slice(&(count as u32).to_le_bytes());
    bytes.extend_from_slice(&mhash.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    for vector in &all_vectors {
        for &v in vector {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    let tmp = bin_path.with_extension(format!("bin.tmp.{}", std::process::id()));
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &bin_path)?;

    // Manifest, same row order.
    let mut manifest = String::from(MANIFEST_HEADER);
    manifest.push('\n');
    for (i, path) in all_paths.iter().enumerate() {
        let offset = HEADER_SIZE + i * dimensions * 4;
        manifest.push_str(&format!("{}\t{}\t{}\t{}\n", path, i, offset, dimensions));
    }
    write_atomic(&manifest_path, &manifest)?;

    Ok(())
}

/// Read and validate a whole embeddings file.
pub fn load_embeddings(path: &Path) -> Result<EmbeddingSet> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, path)
}

/// Memory-mapped read; validation is identical to [`load_embeddings`].
pub fn load_embeddings_mmap(path: &Path) -> Result<EmbeddingSet> {
    let file = std::fs::File::open(path)?;
    // Safety: the store is single-writer and files are replaced by rename,
    // never truncated in place, so the mapping stays valid while held.
    let mmap = unsafe { Mmap::map(&file)? };
    decode(&mmap, path)
}

fn decode(bytes: &[u8], path: &Path) -> Result<EmbeddingSet> {
    let corrupt = |reason: &str| RagError::CorruptEmbeddings {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt("file shorter than header").into());
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(corrupt(&format!("bad magic {:#x}", magic)).into());
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)).into());
    }
    let dimensions = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let mhash = u64::from_le_bytes(bytes[16..24].try_into().unwrap());

    let expected = HEADER_SIZE + count * dimensions * 4;
    if bytes.len() < expected {
        return Err(corrupt(&format!(
            "payload truncated: {} bytes, expected {}",
            bytes.len(),
            expected
        ))
        .into());
    }

    let mut vectors = Vec::with_capacity(count);
    for row in 0..count {
        let start = HEADER_SIZE + row * dimensions * 4;
        let vector: Vec<f32> = bytes[start..start + dimensions * 4]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        vectors.push(vector);
    }

    Ok(EmbeddingSet {
        dimensions,
        model_hash: mhash,
        vectors,
    })
}

/// Ordered chunk paths from a manifest (column 0; comments skipped).
pub fn load_manifest(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split('\t').next().map(|s| s.to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vectors() -> (Vec<Vec<f32>>, Vec<String>) {
        (
            vec![
                vec![1.0, 0.0, 0.5],
                vec![-1.0, 2.25, 0.0],
                vec![0.125, -0.125, 3.0],
            ],
            vec![
                "a/doc/01.txt".to_string(),
                "a/doc/02.txt".to_string(),
                "a/doc/03.txt".to_string(),
            ],
        )
    }

    #[test]
    fn test_roundtrip_bit_identical() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "test-model", false).unwrap();

        let set = load_embeddings(&tmp.path().join(BIN_FILE)).unwrap();
        assert_eq!(set.dimensions, 3);
        assert_eq!(set.vectors, vectors);
        assert_eq!(set.model_hash, model_hash("test-model"));

        let manifest = load_manifest(&tmp.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest, paths);
    }

    #[test]
    fn test_mmap_read_matches_plain_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "m", false).unwrap();
        let a = load_embeddings(&tmp.path().join(BIN_FILE)).unwrap();
        let b = load_embeddings_mmap(&tmp.path().join(BIN_FILE)).unwrap();
        assert_eq!(a.vectors, b.vectors);
        assert_eq!(a.dimensions, b.dimensions);
    }

    #[test]
    fn test_header_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "m", false).unwrap();
        let bytes = std::fs::read(tmp.path().join(BIN_FILE)).unwrap();
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &[0u8; 8]);
        assert_eq!(bytes.len(), HEADER_SIZE + 3 * 3 * 4);
    }

    #[test]
    fn test_append_adds_and_replaces() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "m", false).unwrap();

        // Re-embed chunk 02 and add a new chunk 04.
        let new_vectors = vec![vec![9.0, 9.0, 9.0], vec![7.0, 7.0, 7.0]];
        let new_paths = vec!["a/doc/02.txt".to_string(), "a/doc/04.txt".to_string()];
        write_embeddings(tmp.path(), &new_vectors, &new_paths, 3, "m", true).unwrap();

        let set = load_embeddings(&tmp.path().join(BIN_FILE)).unwrap();
        let manifest = load_manifest(&tmp.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(set.vectors.len(), 4);
        assert_eq!(manifest.len(), 4);

        let idx_02 = manifest.iter().position(|p| p == "a/doc/02.txt").unwrap();
        assert_eq!(set.vectors[idx_02], vec![9.0, 9.0, 9.0]);
        let idx_04 = manifest.iter().position(|p| p == "a/doc/04.txt").unwrap();
        assert_eq!(set.vectors[idx_04], vec![7.0, 7.0, 7.0]);
        // Untouched rows survive.
        let idx_01 = manifest.iter().position(|p| p == "a/doc/01.txt").unwrap();
        assert_eq!(set.vectors[idx_01], vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_append_model_change_rewrites_fresh() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "model-a", false).unwrap();

        let new = vec![vec![1.0, 1.0, 1.0]];
        let new_paths = vec!["b/doc/01.txt".to_string()];
        write_embeddings(tmp.path(), &new, &new_paths, 3, "model-b", true).unwrap();

        let set = load_embeddings(&tmp.path().join(BIN_FILE)).unwrap();
        assert_eq!(set.vectors.len(), 1);
        assert_eq!(set.model_hash, model_hash("model-b"));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(BIN_FILE);
        std::fs::write(&path, b"XXXXYYYYZZZZWWWW0000000000000000").unwrap();
        let err = load_embeddings(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::CorruptEmbeddings { .. })
        ));
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (vectors, paths) = sample_vectors();
        write_embeddings(tmp.path(), &vectors, &paths, 3, "m", false).unwrap();
        let path = tmp.path().join(BIN_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(load_embeddings(&path).is_err());
    }

    #[test]
    fn test_model_hash_is_stable() {
        assert_eq!(model_hash("m"), model_hash("m"));
        assert_ne!(model_hash("m"), model_hash("n"));
    }
}
