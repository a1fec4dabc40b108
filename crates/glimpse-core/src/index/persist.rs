//! On-disk format for [`CosineIndex`](super::CosineIndex).
//!
//! ```text
//! offset 0    [u8; 8]  magic "GLMPSIDX"
//! offset 8    u32 LE   format version (1)
//! offset 12   u32 LE   dimensions
//! offset 16   u64 LE   entry count
//! offset 24   count x { u64 LE key, dimensions x f32 LE }
//! ```
//!
//! Readers check magic, version, exact length and key uniqueness before
//! handing entries out. Writers go through a sibling temp file that is renamed
//! into place, so an interrupted save never leaves a half-written index.

use crate::error::IndexError;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

pub const MAGIC: &[u8; 8] = b"GLMPSIDX";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 24;

/// Contents of a persisted index file.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedIndex {
    pub dimensions: usize,
    pub entries: Vec<(u64, Box<[f32]>)>,
}

/// Writes `entries` to `path` atomically.
#[instrument(skip_all, fields(path = %path.display(), count = entries.len()))]
pub fn write_index(
    path: &Path,
    dimensions: usize,
    entries: &[(u64, &[f32])],
) -> Result<(), IndexError> {
    let dims = u32::try_from(dimensions)
        .map_err(|_| IndexError::InvalidFormat(format!("{} dimensions", dimensions)))?;

    let tmp = temp_path(path);
    let written = write_entries(&tmp, dims, entries)
        .and_then(|()| std::fs::rename(&tmp, path).map_err(IndexError::from));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    debug!("Wrote index file");
    Ok(())
}

fn write_entries(tmp: &Path, dims: u32, entries: &[(u64, &[f32])]) -> Result<(), IndexError> {
    let file = File::create(tmp)?;
    let mut out = BufWriter::new(file);
    out.write_all(MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&dims.to_le_bytes())?;
    out.write_all(&(entries.len() as u64).to_le_bytes())?;

    for (key, vector) in entries {
        if vector.len() != dims as usize {
            return Err(IndexError::DimensionMismatch {
                expected: dims as usize,
                actual: vector.len(),
            });
        }
        out.write_all(&key.to_le_bytes())?;
        for value in vector.iter() {
            out.write_all(&value.to_le_bytes())?;
        }
    }

    let file = out
        .into_inner()
        .map_err(|e| IndexError::Io(e.error().to_string()))?;
    file.sync_all()?;
    Ok(())
}

/// Reads and validates a persisted index.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_index(path: &Path) -> Result<PersistedIndex, IndexError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

/// Decodes an index file held in memory.
pub fn decode(bytes: &[u8]) -> Result<PersistedIndex, IndexError> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::InvalidFormat(format!(
            "file is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if &bytes[0..8] != MAGIC {
        return Err(IndexError::InvalidFormat("bad magic".to_string()));
    }

    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != FORMAT_VERSION {
        return Err(IndexError::InvalidFormat(format!(
            "unsupported version {}",
            version
        )));
    }

    let dimensions = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let count = u64::from_le_bytes([
        bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22], bytes[23],
    ]);

    let entry_len = 8 + dimensions as u64 * 4;
    let expected = count
        .checked_mul(entry_len)
        .and_then(|body| body.checked_add(HEADER_LEN as u64))
        .ok_or_else(|| IndexError::InvalidFormat(format!("{} entries overflow", count)))?;
    if bytes.len() as u64 != expected {
        return Err(IndexError::InvalidFormat(format!(
            "expected {} bytes for {} entries of {} dimensions, found {}",
            expected,
            count,
            dimensions,
            bytes.len()
        )));
    }

    let mut seen = HashSet::with_capacity(count as usize);
    let mut entries = Vec::with_capacity(count as usize);
    for entry in bytes[HEADER_LEN..].chunks_exact(entry_len as usize) {
        let (key_bytes, body) = entry.split_at(8);
        let mut key = [0u8; 8];
        key.copy_from_slice(key_bytes);
        let key = u64::from_le_bytes(key);
        if !seen.insert(key) {
            return Err(IndexError::InvalidFormat(format!("duplicate key {}", key)));
        }

        let vector: Box<[f32]> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        entries.push((key, vector));
    }

    Ok(PersistedIndex {
        dimensions,
        entries,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("images.index");
        let a = [1.0, 0.0];
        let b = [0.5, -0.5];

        write_index(&path, 2, &[(7, &a[..]), (3, &b[..])]).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24 + 2 * (8 + 8));
        assert!(!temp_path(&path).exists());

        let index = read_index(&path).unwrap();
        assert_eq!(index.dimensions, 2);
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].0, 7);
        assert_eq!(&*index.entries[1].1, &b[..]);
    }

    #[test]
    fn test_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("images.index");
        let v = [1.0, 2.0, 3.0];
        write_index(&path, 3, &[(0, &v[..])]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.pop();
        assert!(matches!(decode(&bytes), Err(IndexError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"NOTINDEX");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(IndexError::InvalidFormat(_))));

        bytes[0..8].copy_from_slice(MAGIC);
        bytes[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(IndexError::InvalidFormat(_))));

        bytes[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap().entries.len(), 0);
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.index");
        let v = [1.0];
        write_index(&path, 1, &[(5, &v[..]), (5, &v[..])]).unwrap();

        assert!(matches!(
            read_index(&path),
            Err(IndexError::InvalidFormat(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let v = [1.0, 0.0];

        // Rename onto a non-empty directory fails after the body is written
        let occupied = dir.path().join("images.index");
        std::fs::create_dir(&occupied).unwrap();
        std::fs::write(occupied.join("keep"), b"x").unwrap();
        assert!(matches!(
            write_index(&occupied, 2, &[(0, &v[..])]),
            Err(IndexError::Io(_))
        ));
        assert!(!temp_path(&occupied).exists());

        let path = dir.path().join("narrow.index");
        let short = [1.0];
        assert!(matches!(
            write_index(&path, 2, &[(0, &v[..]), (1, &short[..])]),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(!temp_path(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_index(&dir.path().join("absent.index")),
            Err(IndexError::Io(_))
        ));
    }
}
