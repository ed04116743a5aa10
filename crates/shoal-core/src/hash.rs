//! File and chunk hashing

use crate::{error::Result, types::FileDescriptor};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_BLOCK: usize = 8 * 1024;

/// Hex SHA-256 of an entire file, read in streaming blocks.
pub fn file_digest(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_BLOCK];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a byte slice.
pub fn chunk_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare a blob against an expected hex digest.
pub fn verify(data: &[u8], expected: &str) -> bool {
    chunk_digest(data) == expected
}

/// Stream a file once, computing its whole-file digest and per-chunk
/// digests, and produce its descriptor. The file itself is not copied.
pub fn describe_file(path: &Path, chunk_size: usize) -> Result<FileDescriptor> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut file_hasher = Sha256::new();
    let mut chunk_hashes = Vec::new();
    let mut size = 0u64;
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = read_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        file_hasher.update(&buf[..n]);
        chunk_hashes.push(chunk_digest(&buf[..n]));
        size += n as u64;
        if n < chunk_size {
            break;
        }
    }

    Ok(FileDescriptor {
        name,
        size,
        hash: hex::encode(file_hasher.finalize()),
        chunk_count: chunk_hashes.len() as u32,
        chunk_hashes,
    })
}

/// Read a specific chunk out of a file by offset. The last chunk may be
/// shorter than `chunk_size`.
pub fn read_chunk_at(path: &Path, chunk_index: u32, chunk_size: usize) -> Result<Vec<u8>> {
    use std::io::{Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(chunk_index as u64 * chunk_size as u64))?;

    let mut buf = vec![0u8; chunk_size];
    let n = read_chunk(&mut file, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Fill `buf` from the reader, tolerating short reads. Returns the number
/// of bytes read, 0 at end of file.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn chunk_digest_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            chunk_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            chunk_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_and_rejects() {
        let digest = chunk_digest(b"payload");
        assert!(verify(b"payload", &digest));
        assert!(!verify(b"tampered", &digest));
    }

    #[test]
    fn file_digest_matches_chunk_digest_of_contents() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hash-me-now").unwrap();
        f.flush().unwrap();

        assert_eq!(file_digest(f.path()).unwrap(), chunk_digest(b"hash-me-now"));
    }

    #[test]
    fn describe_file_splits_into_chunks() {
        let mut f = NamedTempFile::new().unwrap();
        let data = vec![0x42u8; 1024 * 2 + 100];
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let desc = describe_file(f.path(), 1024).unwrap();
        assert_eq!(desc.size, data.len() as u64);
        assert_eq!(desc.chunk_count, 3);
        assert_eq!(desc.chunk_hashes.len(), 3);
        assert_eq!(desc.hash, file_digest(f.path()).unwrap());
        assert_eq!(desc.chunk_hashes[0], chunk_digest(&data[..1024]));
        assert_eq!(desc.chunk_hashes[2], chunk_digest(&data[2048..]));
        desc.validate().unwrap();
    }

    #[test]
    fn describe_file_exact_boundary() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&vec![7u8; 2048]).unwrap();
        f.flush().unwrap();

        let desc = describe_file(f.path(), 1024).unwrap();
        assert_eq!(desc.chunk_count, 2);
        assert_eq!(
            desc.chunk_count,
            FileDescriptor::chunks_for(desc.size, 1024)
        );
    }

    #[test]
    fn read_chunk_at_returns_partial_tail() {
        let mut f = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255).cycle().take(1024 + 300).map(|b: u16| b as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let first = read_chunk_at(f.path(), 0, 1024).unwrap();
        assert_eq!(first, &data[..1024]);
        let tail = read_chunk_at(f.path(), 1, 1024).unwrap();
        assert_eq!(tail, &data[1024..]);
        assert_eq!(tail.len(), 300);
    }
}
