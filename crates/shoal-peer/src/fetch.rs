//! Outbound chunk fetch
//!
//! One connection per chunk request. The failure mode matters to the
//! caller: a transport or protocol failure and an explicit refusal feed
//! different reputation events.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use shoal_core::proto::{ChunkHeader, ChunkRequestPayload, Request};
use shoal_core::wire;

/// Why a chunk could not be fetched from a peer.
#[derive(Debug)]
pub enum FetchError {
    /// Connect error, timeout, short read, or malformed header
    Transport(String),
    /// The peer answered with an error header
    Refused(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transport(msg) => write!(f, "transport failure: {}", msg),
            FetchError::Refused(msg) => write!(f, "peer refused: {}", msg),
        }
    }
}

/// Fetch one chunk from one peer. The whole exchange (connect, request,
/// header, payload) must finish within `timeout`.
pub async fn fetch_chunk(
    addr: (String, u16),
    file_hash: &str,
    chunk_index: u32,
    timeout: Duration,
    buffer_size: usize,
) -> Result<Vec<u8>, FetchError> {
    match tokio::time::timeout(
        timeout,
        fetch_inner(addr, file_hash, chunk_index, buffer_size),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(FetchError::Transport("timed out".to_string())),
    }
}

async fn fetch_inner(
    addr: (String, u16),
    file_hash: &str,
    chunk_index: u32,
    buffer_size: usize,
) -> Result<Vec<u8>, FetchError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| FetchError::Transport(format!("connect: {}", e)))?;

    let request = Request::RequestChunk(ChunkRequestPayload {
        file_hash: file_hash.to_string(),
        chunk_index,
    });
    wire::write_message(&mut stream, &request)
        .await
        .map_err(|e| FetchError::Transport(format!("send: {}", e)))?;

    let (header, payload_start) = wire::read_chunk_header(&mut stream, buffer_size)
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    let declared = match header {
        ChunkHeader::Success { chunk_size } => chunk_size as usize,
        ChunkHeader::Error { message } => return Err(FetchError::Refused(message)),
    };

    // Bytes over-read with the header are the front of the payload.
    let mut data = payload_start.to_vec();
    if data.len() > declared {
        return Err(FetchError::Transport(format!(
            "peer sent {} bytes past the declared {}",
            data.len(),
            declared
        )));
    }

    let already = data.len();
    data.resize(declared, 0);
    stream
        .read_exact(&mut data[already..])
        .await
        .map_err(|e| FetchError::Transport(format!("short read: {}", e)))?;

    Ok(data)
}
