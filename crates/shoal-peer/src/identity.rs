//! Peer identity persistence
//!
//! The identity is an opaque `peer_########` string minted on first
//! launch and stable across restarts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use shoal_core::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct IdentityRecord {
    peer_id: String,
}

/// Load the identity from `<dir>/identity.json`, creating and persisting
/// a fresh one on first launch. Errors here are fatal at startup.
pub fn load_or_create(dir: &Path) -> Result<String> {
    let path = dir.join("identity.json");

    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let record: IdentityRecord = serde_json::from_str(&content).map_err(|e| {
            Error::InvalidMetadata(format!("corrupt identity file {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded identity {} from {}", record.peer_id, path.display());
        return Ok(record.peer_id);
    }

    std::fs::create_dir_all(dir)?;
    let peer_id = format!("peer_{}", hex::encode(random_suffix()));
    let record = IdentityRecord {
        peer_id: peer_id.clone(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
    tracing::info!("Created new identity {} at {}", peer_id, path.display());

    Ok(peer_id)
}

fn random_suffix() -> [u8; 4] {
    let mut buf = [0u8; 4];
    // If getrandom fails, fall back to the clock
    if getrandom::getrandom(&mut buf).is_err() {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        buf = ts.to_le_bytes();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn identity_is_stable_across_loads() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("peer_"));
        assert_eq!(first.len(), "peer_".len() + 8);
    }

    #[test]
    fn corrupt_identity_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("identity.json"), "not json").unwrap();
        assert!(load_or_create(dir.path()).is_err());
    }
}
