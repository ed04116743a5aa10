//! Peer configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding identity.json and the peer_storage_<id> tree
    pub data_dir: String,

    /// Tracker endpoint
    pub tracker: TrackerConfig,

    /// Transfer tuning
    pub peer: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub host: String,
    pub port: u16,
    /// Socket receive granularity for framed JSON reads
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Parallel workers per download job
    pub workers: usize,
    /// Per-peer connection timeout for a chunk fetch, seconds
    pub chunk_timeout_secs: u64,
    /// Tracker connection establishment timeout, seconds
    pub tracker_timeout_secs: u64,
    /// Interval between periodic re-registrations, seconds
    pub reregister_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: ".".to_string(),
            tracker: TrackerConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            buffer_size: shoal_core::DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            chunk_size: shoal_core::DEFAULT_CHUNK_SIZE,
            workers: 4,
            chunk_timeout_secs: 15,
            tracker_timeout_secs: 10,
            reregister_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a file; missing file means defaults.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Expand ~ in data_dir
    pub fn data_dir(&self) -> PathBuf {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.tracker.host, "127.0.0.1");
        assert_eq!(config.tracker.port, 9090);
        assert_eq!(config.tracker.buffer_size, 4096);
        assert_eq!(config.peer.chunk_size, 1024 * 1024);
        assert_eq!(config.peer.workers, 4);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tracker]
            port = 9999

            [peer]
            chunk_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker.port, 9999);
        assert_eq!(config.tracker.host, "127.0.0.1");
        assert_eq!(config.peer.chunk_size, 4096);
        assert_eq!(config.peer.workers, 4);
    }
}
