//! Snapshot file format and crash-safe file writes.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic        4 bytes  "LBIX"
//! version      u32
//! dimensions   u32
//! count        u64
//! meta_len     u64
//! meta         JSON { model, created_at, chunks }
//! vectors      count * dimensions * f32
//! checksum     SHA-256 of every preceding byte
//! ```
//!
//! Every write goes to a temporary sibling, is fsynced and then renamed over
//! the target, so readers only ever see a complete old or complete new file.

use chrono::{DateTime, Utc};
use libris_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::types::Chunk;
use crate::vector_index::Snapshot;

pub const MAGIC: &[u8; 4] = b"LBIX";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8;
const CHECKSUM_LEN: usize = 32;

#[derive(Serialize)]
struct MetaRef<'a> {
    model: &'a str,
    created_at: DateTime<Utc>,
    chunks: &'a [Chunk],
}

#[derive(Deserialize)]
struct Meta {
    model: String,
    created_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

/// Serialize a snapshot into the on-disk format.
pub fn encode(snapshot: &Snapshot) -> AppResult<Vec<u8>> {
    let meta = serde_json::to_vec(&MetaRef {
        model: snapshot.model(),
        created_at: snapshot.created_at(),
        chunks: snapshot.chunks(),
    })?;

    let dimensions = u32::try_from(snapshot.dimensions())
        .map_err(|_| AppError::Knowledge("Dimensionality exceeds u32".into()))?;
    let vectors = snapshot.raw_vectors();

    let mut buf =
        Vec::with_capacity(HEADER_LEN + meta.len() + vectors.len() * 4 + CHECKSUM_LEN);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&dimensions.to_le_bytes());
    buf.extend_from_slice(&(snapshot.len() as u64).to_le_bytes());
    buf.extend_from_slice(&(meta.len() as u64).to_le_bytes());
    buf.extend_from_slice(&meta);
    for value in vectors {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest);
    Ok(buf)
}

/// Parse and verify a snapshot file's contents.
///
/// Any structural problem is reported as [`AppError::CorruptIndex`].
pub fn decode(bytes: &[u8]) -> AppResult<Snapshot> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(corrupt(format!("file is only {} bytes", bytes.len())));
    }

    let (body, stored_checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic bytes"));
    }
    if Sha256::digest(body).as_slice() != stored_checksum {
        return Err(corrupt("checksum mismatch"));
    }

    let mut reader = Reader::new(&body[4..]);
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let dimensions = reader.u32()? as usize;
    let count = usize::try_from(reader.u64()?).map_err(|_| corrupt("count overflows"))?;
    let meta_len = usize::try_from(reader.u64()?).map_err(|_| corrupt("meta length overflows"))?;

    let meta: Meta = serde_json::from_slice(reader.take(meta_len)?)
        .map_err(|e| corrupt(format!("unreadable metadata: {}", e)))?;
    if meta.chunks.len() != count {
        return Err(corrupt(format!(
            "header declares {} chunks, metadata has {}",
            count,
            meta.chunks.len()
        )));
    }

    let values = count
        .checked_mul(dimensions)
        .ok_or_else(|| corrupt("vector table size overflows"))?;
    let byte_len = values
        .checked_mul(4)
        .ok_or_else(|| corrupt("vector table size overflows"))?;
    let raw = reader.take(byte_len)?;
    if !reader.is_empty() {
        return Err(corrupt(format!(
            "{} unexpected trailing bytes",
            reader.remaining()
        )));
    }

    let vectors: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Snapshot::from_parts(meta.model, meta.created_at, dimensions, meta.chunks, vectors)
        .map_err(|e| corrupt(e.to_string()))
}

/// Write a snapshot to `path` atomically.
pub fn save(snapshot: &Snapshot, path: &Path) -> AppResult<()> {
    let bytes = encode(snapshot)?;
    write_atomic(path, &bytes)?;
    tracing::info!(
        "Saved snapshot to {:?} ({} chunks, {} bytes)",
        path,
        snapshot.len(),
        bytes.len()
    );
    Ok(())
}

/// Load and verify a snapshot from `path`.
pub fn load(path: &Path) -> AppResult<Snapshot> {
    let bytes = fs::read(path)?;
    let snapshot = decode(&bytes).map_err(|e| match e {
        AppError::CorruptIndex(reason) => {
            AppError::CorruptIndex(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })?;
    tracing::debug!("Loaded snapshot from {:?} ({} chunks)", path, snapshot.len());
    Ok(snapshot)
}

/// Write `bytes` to a temporary sibling of `path`, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_sibling(path);
    let result = (|| -> AppResult<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_parent_directory(path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Copy `src` to `dst` with the same temp-then-rename guarantee.
pub fn copy_atomic(src: &Path, dst: &Path) -> AppResult<Vec<u8>> {
    let bytes = fs::read(src)?;
    write_atomic(dst, &bytes)?;
    Ok(bytes)
}

/// Hex SHA-256 of `bytes`.
pub fn checksum_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Hex of the checksum trailer stored in a snapshot file.
///
/// Identifies the snapshot contents without reading the whole file.
pub fn stored_checksum(path: &Path) -> AppResult<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < (HEADER_LEN + CHECKSUM_LEN) as u64 {
        return Err(corrupt(format!("{}: file is only {} bytes", path.display(), len)));
    }

    let mut trailer = [0u8; CHECKSUM_LEN];
    file.seek(SeekFrom::End(-(CHECKSUM_LEN as i64)))?;
    file.read_exact(&mut trailer)?;
    Ok(trailer.iter().map(|b| format!("{:02x}", b)).collect())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut os = path.as_os_str().to_os_string();
    os.push(format!(".tmp.{}.{}", std::process::id(), nanos));
    PathBuf::from(os)
}

fn sync_parent_directory(path: &Path) -> AppResult<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn corrupt(reason: impl Into<String>) -> AppError {
    AppError::CorruptIndex(reason.into())
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> AppResult<&'a [u8]> {
        if len > self.bytes.len() {
            return Err(corrupt(format!(
                "truncated: wanted {} bytes, {} left",
                len,
                self.bytes.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn u32(&mut self) -> AppResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> AppResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::tests::chunk;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        Snapshot::build(
            vec![
                chunk(0, vec![0.25, -1.5, 3.0]),
                chunk(1, vec![1.0, 0.0, f32::MIN_POSITIVE]),
                chunk(2, vec![-0.0, 7.125, 1e-7]),
            ],
            "text-embedding-3-small",
        )
        .unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data/index.lbx");
        let snapshot = sample();

        save(&snapshot, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.model(), "text-embedding-3-small");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.lbx");
        save(&sample(), &path).unwrap();

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["index.lbx"]);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = encode(&sample()).unwrap();
        for len in [0, 10, HEADER_LEN + 5, bytes.len() - 1] {
            let err = decode(&bytes[..len]).unwrap_err();
            assert!(matches!(err, AppError::CorruptIndex(_)), "len {}", len);
        }
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut bytes = encode(&sample()).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(decode(&bytes).unwrap_err().to_string().contains("magic"));

        // Version 2 with a valid checksum
        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(bytes.len() - CHECKSUM_LEN);
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        let digest = Sha256::digest(&bytes);
        bytes.extend_from_slice(&digest);
        assert!(decode(&bytes).unwrap_err().to_string().contains("version"));
    }

    #[test]
    fn test_load_prefixes_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.lbx");
        fs::write(&path, b"not an index at all, just some text padding it out").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(ref m) if m.contains("index.lbx")));
    }

    #[test]
    fn test_checksum_hex() {
        assert_eq!(
            checksum_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_stored_checksum_matches_body_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.lbx");
        save(&sample(), &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let body = &bytes[..bytes.len() - CHECKSUM_LEN];
        assert_eq!(stored_checksum(&path).unwrap(), checksum_hex(body));
    }

    #[test]
    fn test_copy_atomic_overwrites() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.lbx");
        let dst = temp.path().join("b.lbx");
        fs::write(&src, b"new contents").unwrap();
        fs::write(&dst, b"old").unwrap();

        copy_atomic(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new contents");
    }
}
