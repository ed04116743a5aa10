//! Inbound chunk server
//!
//! Listens on the peer's advertised port and serves one `request_chunk`
//! per connection out of the chunk store. The behavior policy exists so
//! adversarial swarms are reproducible in tests; it is a constructor
//! knob, never end-user configuration, and everything but `Honest` is
//! only ever wired up by the test suite.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use shoal_core::proto::{ChunkHeader, Request};
use shoal_core::{wire, Result};

use crate::storage::ChunkStore;

/// How this peer answers chunk requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Serve what the chunk store has
    #[default]
    Honest,
    /// Refuse every request
    Refusing,
    /// Claim success and send garbage bytes
    Corrupting,
}

pub struct PeerServer {
    storage: Arc<ChunkStore>,
    behavior: Behavior,
    chunk_size: usize,
    buffer_size: usize,
}

impl PeerServer {
    pub fn new(
        storage: Arc<ChunkStore>,
        behavior: Behavior,
        chunk_size: usize,
        buffer_size: usize,
    ) -> Self {
        Self {
            storage,
            behavior,
            chunk_size,
            buffer_size,
        }
    }

    /// Accept loop; one short-lived task per connection. Returns when
    /// the shutdown signal flips.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tracing::debug!("Connection from {} [behavior: {:?}]", addr, self.behavior);
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle(stream).await {
                                    tracing::warn!("Handler error for {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Server error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Peer server shutting down");
                    return;
                }
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) -> Result<()> {
        let mut buf = BytesMut::with_capacity(self.buffer_size);
        let request =
            match wire::read_message::<_, Request>(&mut stream, &mut buf, self.buffer_size).await? {
                Some(request) => request,
                None => return Ok(()),
            };

        let Request::RequestChunk(payload) = request else {
            let reply = ChunkHeader::Error {
                message: "Unknown command".to_string(),
            };
            return wire::write_message(&mut stream, &reply).await;
        };

        match self.behavior {
            Behavior::Refusing => {
                let reply = ChunkHeader::Error {
                    message: "Refused".to_string(),
                };
                wire::write_message(&mut stream, &reply).await?;
            }
            Behavior::Corrupting => {
                // Declare a full chunk and send garbage; the requester's
                // integrity check must throw it away.
                let mut garbage = vec![0u8; self.chunk_size];
                let _ = getrandom::getrandom(&mut garbage);
                let header = ChunkHeader::Success {
                    chunk_size: garbage.len() as u64,
                };
                wire::write_message(&mut stream, &header).await?;
                stream.write_all(&garbage).await?;
                tracing::info!(
                    "Sent corrupt chunk {} of {}...",
                    payload.chunk_index,
                    &payload.file_hash[..payload.file_hash.len().min(10)]
                );
            }
            Behavior::Honest => {
                let data = self.storage.read_chunk(
                    &payload.file_hash,
                    payload.chunk_index,
                    self.chunk_size,
                )?;
                match data {
                    Some(data) => {
                        let header = ChunkHeader::Success {
                            chunk_size: data.len() as u64,
                        };
                        wire::write_message(&mut stream, &header).await?;
                        stream.write_all(&data).await?;
                        tracing::debug!(
                            "Sent chunk {} ({} bytes)",
                            payload.chunk_index,
                            data.len()
                        );
                    }
                    None => {
                        let reply = ChunkHeader::Error {
                            message: "Not found".to_string(),
                        };
                        wire::write_message(&mut stream, &reply).await?;
                    }
                }
            }
        }

        Ok(())
    }
}
