//! Wire message definitions
//!
//! Every message is a single UTF-8 JSON object with no length prefix.
//! Requests carry a `command` discriminator and a `payload` object;
//! replies carry a `status` discriminator with their fields inlined.
//! A successful chunk reply is followed on the same stream by exactly
//! `chunk_size` raw payload bytes.

use serde::{Deserialize, Serialize};

use crate::types::{FileDescriptor, PeerAddr, SearchHit};

/// Requests sent to the tracker or to a peer's chunk server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Request {
    /// Announce our identity, listen port, and held files to the tracker
    Register(RegisterPayload),
    /// Ask the tracker who holds a file
    QueryFile(QueryFilePayload),
    /// Substring search over display names at the tracker
    Search(SearchPayload),
    /// Ask a peer for one chunk
    RequestChunk(ChunkRequestPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub peer_id: String,
    pub port: u16,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilePayload {
    pub file_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequestPayload {
    pub file_hash: String,
    pub chunk_index: u32,
}

/// Generic status-and-message reply (register, unknown command)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusReply {
    Success { message: String },
    Error { message: String },
}

/// Reply to `query_file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryFileReply {
    Success {
        file_name: String,
        file_size: u64,
        chunk_count: u32,
        chunk_hashes: Vec<String>,
        peers: Vec<PeerAddr>,
    },
    Error {
        message: String,
    },
}

/// Reply to `search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SearchReply {
    Success { results: Vec<SearchHit> },
    Error { message: String },
}

/// Header of a chunk reply. On `Success`, exactly `chunk_size` raw bytes
/// follow on the stream; on `Error` nothing follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkHeader {
    Success { chunk_size: u64 },
    Error { message: String },
}
