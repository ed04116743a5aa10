//! Shoal Tracker - file index and peer rendezvous
//!
//! Peers hold one long-lived TCP connection to the tracker, register the
//! files they carry over it, and are dropped from the index the moment
//! the connection closes.

pub mod handler;
pub mod index;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

pub use index::TrackerIndex;

/// Accept-and-dispatch loop. Runs until the shutdown signal flips.
pub async fn run(
    listener: TcpListener,
    index: Arc<TrackerIndex>,
    buffer_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("New connection from {}", peer);
                        let index = index.clone();
                        tokio::spawn(handler::handle_connection(
                            index,
                            stream,
                            peer.ip(),
                            buffer_size,
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Error accepting connection: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("Tracker accept loop shutting down");
                return;
            }
        }
    }
}
