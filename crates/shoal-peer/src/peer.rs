//! Peer supervisor
//!
//! Binds the stores, the chunk server, the tracker connection, and the
//! job registry into one long-running node: loads the persistent
//! identity, registers with the tracker, re-registers every 30 seconds,
//! and exposes the share/download/search surface that front-ends drive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use shoal_core::{FileDescriptor, Result, SearchHit};

use crate::config::Config;
use crate::downloader::{DownloadOptions, SwarmDownloader};
use crate::identity;
use crate::jobs::{DownloadsSnapshot, JobRegistry, JobStatus};
use crate::reputation::{ReputationEntry, ReputationStore};
use crate::server::{Behavior, PeerServer};
use crate::storage::ChunkStore;
use crate::tracker_client::TrackerClient;

pub struct Peer {
    peer_id: String,
    listen_port: u16,
    config: Config,
    storage: Arc<ChunkStore>,
    reputation: Arc<ReputationStore>,
    jobs: Arc<JobRegistry>,
    tracker: Arc<TrackerClient>,
    shutdown: watch::Sender<bool>,
}

impl Peer {
    /// Bring up an honest peer.
    pub async fn start(config: Config) -> Result<Arc<Self>> {
        Self::start_with_behavior(config, Behavior::Honest).await
    }

    /// Bring up a peer with an explicit behavior policy. Anything but
    /// `Honest` exists for adversarial test swarms.
    pub async fn start_with_behavior(config: Config, behavior: Behavior) -> Result<Arc<Self>> {
        let data_dir = config.data_dir();
        let peer_id = identity::load_or_create(&data_dir)?;

        let base_dir = data_dir.join(format!("peer_storage_{}", peer_id));
        let storage = Arc::new(ChunkStore::open(base_dir.clone())?);
        let reputation = Arc::new(ReputationStore::open(&base_dir.join("reputation.db"))?);
        let jobs = Arc::new(JobRegistry::new());

        // The chunk server binds an OS-chosen free port; that port is
        // what we advertise to the tracker.
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let listen_port = listener.local_addr()?.port();

        let tracker = Arc::new(TrackerClient::new(
            config.tracker.host.clone(),
            config.tracker.port,
            config.tracker.buffer_size,
            Duration::from_secs(config.peer.tracker_timeout_secs),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = Arc::new(PeerServer::new(
            storage.clone(),
            behavior,
            config.peer.chunk_size,
            config.tracker.buffer_size,
        ));
        tokio::spawn(server.run(listener, shutdown_rx.clone()));

        tracing::info!(
            "Peer {} initializing, serving on 127.0.0.1:{}",
            peer_id,
            listen_port
        );
        tracing::info!("Storage location: {}", base_dir.display());

        let peer = Arc::new(Self {
            peer_id,
            listen_port,
            config,
            storage,
            reputation,
            jobs,
            tracker,
            shutdown: shutdown_tx,
        });

        // Initial registration; a dead tracker is tolerated, the
        // periodic task keeps retrying.
        if let Err(e) = peer.register().await {
            tracing::warn!("Initial tracker registration failed: {}", e);
        }
        peer.clone().spawn_reregister_loop(shutdown_rx);

        Ok(peer)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn storage(&self) -> &Arc<ChunkStore> {
        &self.storage
    }

    /// Share a local file: descriptor it, keep serving it from its
    /// original path, and announce it.
    pub async fn share(&self, path: &Path) -> Result<FileDescriptor> {
        tracing::info!("Sharing new file: {}", path.display());
        let descriptor = self
            .storage
            .add_share(path, self.config.peer.chunk_size)?;
        tracing::info!(
            "File '{}' processed. Hash: {}",
            descriptor.name,
            descriptor.hash
        );

        if let Err(e) = self.register().await {
            tracing::warn!("Tracker registration after share failed: {}", e);
        }
        Ok(descriptor)
    }

    /// Run a download job to completion and return its terminal status.
    pub async fn download(&self, file_hash: &str, destination: Option<PathBuf>) -> JobStatus {
        let downloader = SwarmDownloader::new(
            self.peer_id.clone(),
            self.listen_port,
            self.storage.clone(),
            self.reputation.clone(),
            self.jobs.clone(),
            DownloadOptions {
                chunk_size: self.config.peer.chunk_size,
                workers: self.config.peer.workers,
                chunk_timeout: Duration::from_secs(self.config.peer.chunk_timeout_secs),
                buffer_size: self.config.tracker.buffer_size,
            },
        );
        downloader.run(&self.tracker, file_hash, destination).await
    }

    /// Fire-and-forget variant for UIs; progress lands in `downloads()`.
    pub fn spawn_download(self: &Arc<Self>, file_hash: String, destination: Option<PathBuf>) {
        let peer = self.clone();
        tokio::spawn(async move {
            peer.download(&file_hash, destination).await;
        });
    }

    /// Substring search at the tracker.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.tracker.search(query).await
    }

    // Observation interface

    pub fn my_files(&self) -> Vec<FileDescriptor> {
        self.storage.tracked_files()
    }

    pub fn downloads(&self) -> DownloadsSnapshot {
        self.jobs.snapshot()
    }

    pub fn reputations(&self) -> Result<Vec<ReputationEntry>> {
        self.reputation.snapshot()
    }

    /// Stop accepting, drop the tracker connection (which deregisters
    /// us), and let in-flight handlers drain.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.tracker.disconnect().await;
        tracing::info!("Peer {} has shut down.", self.peer_id);
    }

    async fn register(&self) -> Result<()> {
        self.tracker
            .register(
                &self.peer_id,
                self.listen_port,
                self.storage.tracked_files(),
            )
            .await?;
        tracing::info!("Successfully registered with tracker.");
        Ok(())
    }

    /// Keep presence fresh: re-send `register` on an interval over the
    /// same control connection. A failed send drops the socket and the
    /// next tick reconnects.
    fn spawn_reregister_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.peer.reregister_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.register().await {
                            tracing::warn!("Periodic re-registration failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }
}
