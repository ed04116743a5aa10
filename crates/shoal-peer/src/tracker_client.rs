//! Tracker control connection
//!
//! The supervisor owns one long-lived connection to the tracker; every
//! request waits its turn on an async mutex, so there is never more
//! than one outstanding request. A send or receive failure drops the
//! socket; the next request (or the next periodic re-registration)
//! reconnects.

use std::time::Duration;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use shoal_core::proto::{
    QueryFilePayload, QueryFileReply, RegisterPayload, Request, SearchPayload, SearchReply,
    StatusReply,
};
use shoal_core::{wire, Error, FileDescriptor, PeerAddr, Result, SearchHit};

/// Everything `query_file` tells us about a file and its holders.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub descriptor: FileDescriptor,
    pub peers: Vec<PeerAddr>,
}

struct Conn {
    stream: TcpStream,
    buf: BytesMut,
}

pub struct TrackerClient {
    host: String,
    port: u16,
    buffer_size: usize,
    connect_timeout: Duration,
    conn: Mutex<Option<Conn>>,
}

impl TrackerClient {
    pub fn new(host: String, port: u16, buffer_size: usize, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            buffer_size,
            connect_timeout,
            conn: Mutex::new(None),
        }
    }

    /// Announce identity, listen port, and held files. Repeating this is
    /// how presence stays fresh; the tracker treats it as refresh-and-union.
    pub async fn register(
        &self,
        peer_id: &str,
        listen_port: u16,
        files: Vec<FileDescriptor>,
    ) -> Result<()> {
        let request = Request::Register(RegisterPayload {
            peer_id: peer_id.to_string(),
            port: listen_port,
            files,
        });
        let reply: StatusReply = self.request(&request).await?;
        match reply {
            StatusReply::Success { .. } => Ok(()),
            StatusReply::Error { message } => Err(Error::Protocol(message)),
        }
    }

    /// Ask who holds a file. An error reply ("File not found", "File
    /// found, but no active peers available") surfaces as `NotFound`.
    pub async fn query_file(&self, file_hash: &str) -> Result<QueryResult> {
        let request = Request::QueryFile(QueryFilePayload {
            file_hash: file_hash.to_string(),
        });
        let reply: QueryFileReply = self.request(&request).await?;
        match reply {
            QueryFileReply::Success {
                file_name,
                file_size,
                chunk_count,
                chunk_hashes,
                peers,
            } => Ok(QueryResult {
                descriptor: FileDescriptor {
                    name: file_name,
                    size: file_size,
                    hash: file_hash.to_string(),
                    chunk_count,
                    chunk_hashes,
                },
                peers,
            }),
            QueryFileReply::Error { message } => Err(Error::NotFound(message)),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let request = Request::Search(SearchPayload {
            query: query.to_string(),
        });
        let reply: SearchReply = self.request(&request).await?;
        match reply {
            SearchReply::Success { results } => Ok(results),
            SearchReply::Error { message } => Err(Error::Protocol(message)),
        }
    }

    /// Drop the control connection (shutdown, or forced reconnect).
    pub async fn disconnect(&self) {
        let mut guard = self.conn.lock().await;
        *guard = None;
    }

    async fn request<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        let mut guard = self.conn.lock().await;

        // One reconnection attempt for requests that arrive while the
        // socket is down.
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::TrackerUnavailable("not connected".to_string()));
        };

        match Self::exchange(conn, request, self.buffer_size).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::error!("Error communicating with tracker: {}", e);
                *guard = None;
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Conn> {
        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!("Connecting to tracker at {}...", addr);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::TrackerUnavailable(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::TrackerUnavailable(format!("connect to {}: {}", addr, e)))?;
        Ok(Conn {
            stream,
            buf: BytesMut::new(),
        })
    }

    async fn exchange<T: DeserializeOwned>(
        conn: &mut Conn,
        request: &Request,
        buffer_size: usize,
    ) -> Result<T> {
        wire::write_message(&mut conn.stream, request).await?;
        wire::read_message(&mut conn.stream, &mut conn.buf, buffer_size)
            .await?
            .ok_or_else(|| Error::TrackerUnavailable("tracker closed the connection".to_string()))
    }
}
