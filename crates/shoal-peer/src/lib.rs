//! Shoal Peer Library
//!
//! A peer shares files with the swarm, serves chunks to other peers,
//! and downloads files in parallel from reputation-ranked sources.

pub mod config;
pub mod downloader;
pub mod fetch;
pub mod identity;
pub mod jobs;
pub mod peer;
pub mod reputation;
pub mod server;
pub mod storage;
pub mod tracker_client;

pub use config::Config;
pub use jobs::{DownloadsSnapshot, JobState, JobStatus};
pub use peer::Peer;
pub use server::Behavior;
