//! Per-connection request loop
//!
//! One task per connected peer. Requests are read until the peer closes
//! the socket; closing is the deregistration signal.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;

use shoal_core::proto::{Request, StatusReply};
use shoal_core::{wire, Result};

use crate::index::TrackerIndex;

/// Serve one peer's control connection until it disconnects, then
/// deregister whatever identity it last announced.
pub async fn handle_connection(
    index: Arc<TrackerIndex>,
    mut stream: TcpStream,
    client_ip: IpAddr,
    buffer_size: usize,
) {
    let mut seen_peer_id: Option<String> = None;

    if let Err(e) = serve(&index, &mut stream, client_ip, buffer_size, &mut seen_peer_id).await {
        tracing::warn!("Connection from {} ended with error: {}", client_ip, e);
    }

    if let Some(peer_id) = seen_peer_id {
        index.deregister(&peer_id);
    }
    tracing::info!("Closed connection from {}", client_ip);
}

async fn serve(
    index: &TrackerIndex,
    stream: &mut TcpStream,
    client_ip: IpAddr,
    buffer_size: usize,
    seen_peer_id: &mut Option<String>,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        let request = match wire::read_message::<_, Request>(stream, &mut buf, buffer_size).await? {
            Some(request) => request,
            None => return Ok(()),
        };

        match request {
            Request::Register(payload) => {
                *seen_peer_id = Some(payload.peer_id.clone());
                let reply = index.register(&payload, client_ip);
                wire::write_message(stream, &reply).await?;
            }
            Request::QueryFile(payload) => {
                tracing::info!(
                    "Received query for file hash: {}...",
                    &payload.file_hash[..payload.file_hash.len().min(10)]
                );
                let reply = index.query_file(&payload.file_hash);
                wire::write_message(stream, &reply).await?;
            }
            Request::Search(payload) => {
                tracing::info!("Search request: '{}'", payload.query);
                let reply = index.search(&payload.query);
                wire::write_message(stream, &reply).await?;
            }
            Request::RequestChunk(_) => {
                let reply = StatusReply::Error {
                    message: "Unknown command".to_string(),
                };
                wire::write_message(stream, &reply).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::proto::{QueryFilePayload, QueryFileReply, RegisterPayload};
    use shoal_core::FileDescriptor;
    use tokio::net::TcpListener;

    async fn start_test_tracker() -> (Arc<TrackerIndex>, std::net::SocketAddr) {
        let index = Arc::new(TrackerIndex::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_index = index.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    break;
                };
                let index = accept_index.clone();
                tokio::spawn(handle_connection(index, stream, peer.ip(), 4096));
            }
        });

        (index, addr)
    }

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            name: "wire.bin".to_string(),
            size: 1024,
            hash: "9f".repeat(32),
            chunk_count: 1,
            chunk_hashes: vec!["1a".repeat(32)],
        }
    }

    #[tokio::test]
    async fn register_query_and_disconnect_deregisters() {
        let (index, addr) = start_test_tracker().await;
        let desc = descriptor();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = BytesMut::new();

        wire::write_message(
            &mut stream,
            &Request::Register(RegisterPayload {
                peer_id: "peer_11112222".to_string(),
                port: 6001,
                files: vec![desc.clone()],
            }),
        )
        .await
        .unwrap();
        let reply: StatusReply = wire::read_message(&mut stream, &mut buf, 4096)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reply, StatusReply::Success { .. }));

        wire::write_message(
            &mut stream,
            &Request::QueryFile(QueryFilePayload {
                file_hash: desc.hash.clone(),
            }),
        )
        .await
        .unwrap();
        let reply: QueryFileReply = wire::read_message(&mut stream, &mut buf, 4096)
            .await
            .unwrap()
            .unwrap();
        match reply {
            QueryFileReply::Success { peers, .. } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].port, 6001);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        // Dropping the control connection is the deregistration signal.
        drop(stream);
        for _ in 0..50 {
            if !index.is_registered("peer_11112222") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!index.is_registered("peer_11112222"));
        assert!(matches!(
            index.query_file(&desc.hash),
            QueryFileReply::Error { .. }
        ));
    }
}
