//! Shoal Core - Shared types, wire protocol, and hashing
//!
//! This crate provides the fundamental building blocks for the Shoal
//! swarm file distribution system: file descriptors, the SHA-256
//! integrity pipeline, and the framed JSON wire protocol spoken between
//! peers and the tracker.

pub mod error;
pub mod hash;
pub mod proto;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use types::*;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default receive buffer size for socket reads
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
