//! Core data types for Shoal

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Immutable description of a file in the swarm, keyed by its whole-file
/// SHA-256 digest. The display name is not authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Display name (basename of the original file)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Hex SHA-256 of the entire file
    pub hash: String,
    /// Number of chunks
    pub chunk_count: u32,
    /// Hex SHA-256 per chunk, in index order
    pub chunk_hashes: Vec<String>,
}

impl FileDescriptor {
    /// Number of chunks a file of `size` bytes splits into.
    pub fn chunks_for(size: u64, chunk_size: usize) -> u32 {
        size.div_ceil(chunk_size as u64) as u32
    }

    /// Check the internal consistency a descriptor must have before it is
    /// used to drive a download: one chunk hash per chunk.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_hashes.len() != self.chunk_count as usize {
            return Err(Error::InvalidMetadata(format!(
                "descriptor for {} declares {} chunks but carries {} chunk hashes",
                self.hash,
                self.chunk_count,
                self.chunk_hashes.len()
            )));
        }
        Ok(())
    }
}

/// A peer advertised by the tracker as a holder of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Opaque peer identity
    pub id: String,
    /// IP address as observed by the tracker
    pub ip: String,
    /// Port the peer's chunk server listens on
    pub port: u16,
}

impl PeerAddr {
    pub fn addr(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }
}

/// One tracker search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Whole-file hex SHA-256
    pub hash: String,
    /// Display name
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Number of connected peers advertising the file
    pub seeders: u32,
}
