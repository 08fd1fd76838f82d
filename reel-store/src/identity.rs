//! Content identity derivation
//!
//! An item's ID is the first 16 hex characters of a SHA-256 digest over the
//! file's first 256 bytes, followed by its last 256 bytes when the file is
//! larger than 256 bytes. Only the sampled bytes are read, so identifying a
//! multi-gigabyte video costs two small reads.
//!
//! Two files that agree on both windows share an ID. That collision risk is
//! accepted in exchange for constant-cost identification.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Bytes sampled from each end of the file
pub const SAMPLE_SIZE: u64 = 256;

/// Hex characters kept from the digest
pub const ID_LEN: usize = 16;

/// Derive the content ID synchronously
pub fn content_id_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; SAMPLE_SIZE as usize];

    let head = read_up_to(&mut file, &mut buffer)?;
    hasher.update(&buffer[..head]);

    if size > SAMPLE_SIZE {
        file.seek(SeekFrom::Start(size - SAMPLE_SIZE))?;
        let tail = read_up_to(&mut file, &mut buffer)?;
        hasher.update(&buffer[..tail]);
    }

    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(ID_LEN);
    Ok(id)
}

/// Derive the content ID on the blocking pool
pub async fn content_id(path: &Path) -> StoreResult<String> {
    let path_buf = path.to_path_buf();
    tracing::debug!(path = %path_buf.display(), "Deriving content ID");

    let target = path_buf.clone();
    let result = tokio::task::spawn_blocking(move || content_id_blocking(&target))
        .await
        .map_err(|e| StoreError::Identity {
            path: path_buf.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    result.map_err(|source| StoreError::Identity {
        path: path_buf,
        source,
    })
}

// Fills as much of `buf` as the file allows; a single read() may return short.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn expected(sampled: &[u8]) -> String {
        format!("{:x}", Sha256::digest(sampled))[..ID_LEN].to_string()
    }

    #[test]
    fn test_small_file_hashes_whole_content() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "small.bin", b"tiny clip");

        let id = content_id_blocking(&path).unwrap();
        assert_eq!(id.len(), ID_LEN);
        assert_eq!(id, expected(b"tiny clip"));
    }

    #[test]
    fn test_large_file_hashes_head_and_tail() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let path = write_file(&dir, "large.bin", &content);

        let mut sampled = content[..256].to_vec();
        sampled.extend_from_slice(&content[content.len() - 256..]);

        assert_eq!(content_id_blocking(&path).unwrap(), expected(&sampled));
    }

    #[test]
    fn test_middle_bytes_do_not_affect_id() {
        let dir = TempDir::new().unwrap();
        let mut a = vec![7u8; 1024];
        let mut b = a.clone();
        a[512] = 1;
        b[512] = 2;

        let path_a = write_file(&dir, "a.bin", &a);
        let path_b = write_file(&dir, "b.bin", &b);
        assert_eq!(
            content_id_blocking(&path_a).unwrap(),
            content_id_blocking(&path_b).unwrap()
        );
    }

    #[test]
    fn test_same_content_different_path_same_id() {
        let dir = TempDir::new().unwrap();
        let first = write_file(&dir, "first.mp4", b"identical bytes");
        let second = write_file(&dir, "second.mp4", b"identical bytes");
        assert_eq!(
            content_id_blocking(&first).unwrap(),
            content_id_blocking(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_identity_error() {
        let dir = TempDir::new().unwrap();
        let err = content_id(&dir.path().join("gone.mp4")).await.unwrap_err();
        assert!(matches!(err, StoreError::Identity { .. }));
    }
}
