//! Swarm downloader
//!
//! One job per target file: discover holders via the tracker, order
//! them by reputation, then drain a shared chunk queue with parallel
//! workers. Each worker fails over peer by peer for its chunk,
//! verifying every payload before it is stored. A chunk that exhausts
//! every peer is abandoned; the job carries on and finishes `Stalled`
//! instead of aborting.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shoal_core::{hash, FileDescriptor, PeerAddr};

use crate::fetch::{self, FetchError};
use crate::jobs::{JobRegistry, JobStatus};
use crate::reputation::{ReputationEvent, ReputationStore};
use crate::storage::ChunkStore;
use crate::tracker_client::TrackerClient;

/// Knobs the supervisor hands every job.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub chunk_timeout: Duration,
    pub buffer_size: usize,
}

pub struct SwarmDownloader {
    peer_id: String,
    listen_port: u16,
    storage: Arc<ChunkStore>,
    reputation: Arc<ReputationStore>,
    jobs: Arc<JobRegistry>,
    options: DownloadOptions,
}

impl SwarmDownloader {
    pub fn new(
        peer_id: String,
        listen_port: u16,
        storage: Arc<ChunkStore>,
        reputation: Arc<ReputationStore>,
        jobs: Arc<JobRegistry>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            peer_id,
            listen_port,
            storage,
            reputation,
            jobs,
            options,
        }
    }

    /// Run one download job to its terminal state. Only a failed tracker
    /// query aborts early; everything else runs to natural completion.
    pub async fn run(
        &self,
        tracker: &TrackerClient,
        file_hash: &str,
        destination: Option<PathBuf>,
    ) -> JobStatus {
        tracing::info!(
            "Attempting to download file: {}...",
            &file_hash[..file_hash.len().min(10)]
        );

        let query = match tracker.query_file(file_hash).await {
            Ok(query) => query,
            Err(e) => {
                tracing::error!("Tracker query failed: {}", e);
                self.jobs.start(file_hash, "(unknown)", 0, 0);
                self.jobs.finish(file_hash, JobStatus::Error, None);
                return JobStatus::Error;
            }
        };

        let descriptor = query.descriptor;
        if let Err(e) = descriptor.validate() {
            tracing::error!("Invalid metadata for {}: {}", file_hash, e);
            self.jobs.start(file_hash, &descriptor.name, descriptor.size, 0);
            self.jobs.finish(file_hash, JobStatus::Error, None);
            return JobStatus::Error;
        }

        self.storage.add_download(&descriptor);
        if !self
            .jobs
            .start(file_hash, &descriptor.name, descriptor.size, descriptor.chunk_count)
        {
            // Another job for this hash is already in flight.
            return JobStatus::Downloading;
        }

        let status = self
            .run_inner(tracker, &descriptor, query.peers, destination)
            .await;
        tracing::info!("Download of {} finished: {}", descriptor.name, status);
        status
    }

    async fn run_inner(
        &self,
        tracker: &TrackerClient,
        descriptor: &FileDescriptor,
        peers: Vec<PeerAddr>,
        destination: Option<PathBuf>,
    ) -> JobStatus {
        let file_hash = &descriptor.hash;

        // Short-circuits, first match wins: the file may already be
        // here in one form or another.
        if self.storage.is_complete(file_hash) {
            if let Some(source) = self.storage.seed_source(file_hash) {
                if source.exists() {
                    tracing::info!("File already shared from {}", source.display());
                    self.jobs.chunks_preowned(file_hash, descriptor.chunk_count);
                    return self.finalize(tracker, descriptor, source, destination).await;
                }
            }
        }
        if let Some(completed) = self.storage.completed_path(file_hash) {
            if completed.exists() {
                tracing::info!("File already reassembled at {}", completed.display());
                self.jobs.chunks_preowned(file_hash, descriptor.chunk_count);
                return self.finalize(tracker, descriptor, completed, destination).await;
            }
        }
        if self.storage.is_complete(file_hash)
            && self
                .storage
                .has_physical_chunks(file_hash, descriptor.chunk_count)
        {
            self.jobs.chunks_preowned(file_hash, descriptor.chunk_count);
            return self
                .reassemble_and_finalize(tracker, descriptor, destination)
                .await;
        }

        let work: Vec<u32> = self.storage.missing(file_hash).into_iter().collect();
        self.jobs
            .chunks_preowned(file_hash, descriptor.chunk_count - work.len() as u32);

        // Candidate sources: everyone but us, best reputation first.
        let peers = self.order_peers(peers);
        tracing::info!("Found {} peers for {}", peers.len(), descriptor.name);

        if !work.is_empty() {
            let queue = Arc::new(Mutex::new(VecDeque::from(work)));
            let any_abandoned = Arc::new(AtomicBool::new(false));
            let peers = Arc::new(peers);
            let descriptor = Arc::new(descriptor.clone());

            let mut handles = Vec::new();
            for worker_id in 0..self.options.workers.max(1) {
                handles.push(tokio::spawn(worker(
                    worker_id,
                    self.peer_id.clone(),
                    queue.clone(),
                    descriptor.clone(),
                    peers.clone(),
                    self.storage.clone(),
                    self.reputation.clone(),
                    self.jobs.clone(),
                    self.options.clone(),
                    any_abandoned.clone(),
                )));
            }
            for handle in handles {
                let _ = handle.await;
            }

            if !self.storage.is_complete(file_hash) {
                let status = if any_abandoned.load(Ordering::SeqCst) {
                    JobStatus::Stalled
                } else {
                    JobStatus::MissingChunks
                };
                self.jobs.finish(file_hash, status, None);
                return status;
            }
        }

        // Every chunk is accounted for; turn them back into a file.
        if self
            .storage
            .has_physical_chunks(file_hash, descriptor.chunk_count)
        {
            self.reassemble_and_finalize(tracker, descriptor, destination)
                .await
        } else if let Some(source) = self.storage.seed_source(file_hash) {
            self.finalize(tracker, descriptor, source, destination).await
        } else {
            tracing::error!(
                "Chunk map says {} is complete but no bytes are on disk",
                descriptor.name
            );
            self.jobs.finish(file_hash, JobStatus::MissingChunks, None);
            JobStatus::MissingChunks
        }
    }

    /// Tracker peer list -> (id, addr) pairs, self excluded, ordered by
    /// current reputation score descending.
    fn order_peers(&self, peers: Vec<PeerAddr>) -> Vec<(String, (String, u16))> {
        let peers: Vec<PeerAddr> = peers
            .into_iter()
            .filter(|p| p.id != self.peer_id)
            .collect();
        let ids: Vec<String> = peers.iter().map(|p| p.id.clone()).collect();
        let ordered = self.reputation.order(&ids);

        ordered
            .into_iter()
            .filter_map(|(id, _score)| {
                peers
                    .iter()
                    .find(|p| p.id == id)
                    .map(|p| (id.clone(), p.addr()))
            })
            .collect()
    }

    async fn reassemble_and_finalize(
        &self,
        tracker: &TrackerClient,
        descriptor: &FileDescriptor,
        destination: Option<PathBuf>,
    ) -> JobStatus {
        tracing::info!("Download complete. Reassembling {}...", descriptor.name);

        let output = match self.storage.reassemble(&descriptor.hash) {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Reassembly of {} failed: {}", descriptor.name, e);
                self.jobs
                    .finish(&descriptor.hash, JobStatus::ReassemblyFailed, None);
                return JobStatus::ReassemblyFailed;
            }
        };

        match hash::file_digest(&output) {
            Ok(digest) if digest == descriptor.hash => {
                tracing::info!("File integrity check SUCCESS for {}", output.display());
            }
            Ok(digest) => {
                tracing::error!(
                    "File integrity failed after reassembly: expected {}, got {}",
                    descriptor.hash,
                    digest
                );
                self.jobs
                    .finish(&descriptor.hash, JobStatus::ReassemblyFailed, None);
                return JobStatus::ReassemblyFailed;
            }
            Err(e) => {
                tracing::error!("Could not hash reassembled file: {}", e);
                self.jobs
                    .finish(&descriptor.hash, JobStatus::ReassemblyFailed, None);
                return JobStatus::ReassemblyFailed;
            }
        }

        self.finalize(tracker, descriptor, output, destination).await
    }

    /// Copy to the caller's destination if one was given, re-register so
    /// we now advertise the file, and close out the job.
    async fn finalize(
        &self,
        tracker: &TrackerClient,
        descriptor: &FileDescriptor,
        verified_path: PathBuf,
        destination: Option<PathBuf>,
    ) -> JobStatus {
        let final_path = match destination {
            Some(dest) => {
                let target = if dest.is_dir() {
                    dest.join(&descriptor.name)
                } else {
                    dest
                };
                match std::fs::copy(&verified_path, &target) {
                    Ok(_) => target,
                    Err(e) => {
                        tracing::error!(
                            "Could not copy {} to {}: {}",
                            verified_path.display(),
                            target.display(),
                            e
                        );
                        verified_path
                    }
                }
            }
            None => verified_path,
        };

        self.reregister(tracker).await;
        self.jobs
            .finish(&descriptor.hash, JobStatus::Complete, Some(final_path));
        JobStatus::Complete
    }

    async fn reregister(&self, tracker: &TrackerClient) {
        if let Err(e) = tracker
            .register(&self.peer_id, self.listen_port, self.storage.tracked_files())
            .await
        {
            tracing::warn!("Re-registration after download failed: {}", e);
        }
    }
}

/// One download worker: pull chunk indices off the shared queue until it
/// drains, trying peers in rotated reputation order for each.
#[allow(clippy::too_many_arguments)]
async fn worker(
    worker_id: usize,
    self_peer_id: String,
    queue: Arc<Mutex<VecDeque<u32>>>,
    descriptor: Arc<FileDescriptor>,
    peers: Arc<Vec<(String, (String, u16))>>,
    storage: Arc<ChunkStore>,
    reputation: Arc<ReputationStore>,
    jobs: Arc<JobRegistry>,
    options: DownloadOptions,
    any_abandoned: Arc<AtomicBool>,
) {
    loop {
        let chunk_index = {
            let mut queue = queue.lock().unwrap();
            queue.pop_front()
        };
        let Some(chunk_index) = chunk_index else {
            return;
        };

        let mut success = false;

        // Rotate the candidate list by chunk index so different chunks
        // lead with different peers while keeping reputation order from
        // the rotation point onward.
        let num_peers = peers.len();
        let start = if num_peers > 0 {
            chunk_index as usize % num_peers
        } else {
            0
        };

        for offset in 0..num_peers {
            let (peer_id, addr) = &peers[(start + offset) % num_peers];
            if *peer_id == self_peer_id {
                continue;
            }

            match fetch::fetch_chunk(
                addr.clone(),
                &descriptor.hash,
                chunk_index,
                options.chunk_timeout,
                options.buffer_size,
            )
            .await
            {
                Ok(data) => {
                    if hash::verify(&data, &descriptor.chunk_hashes[chunk_index as usize]) {
                        if let Err(e) = storage.store_chunk(&descriptor.hash, chunk_index, &data) {
                            tracing::error!(
                                "[worker-{}] Could not store chunk {}: {}",
                                worker_id,
                                chunk_index,
                                e
                            );
                            break;
                        }
                        record(&reputation, peer_id, ReputationEvent::SuccessfulDownload);
                        record(&reputation, peer_id, ReputationEvent::VerifiedIntegrity);
                        jobs.chunk_done(&descriptor.hash);
                        tracing::debug!(
                            "[worker-{}] Chunk {} verified.",
                            worker_id,
                            chunk_index
                        );
                        success = true;
                        break;
                    } else {
                        tracing::warn!(
                            "[worker-{}] Chunk {} from {} CORRUPT.",
                            worker_id,
                            chunk_index,
                            peer_id
                        );
                        record(&reputation, peer_id, ReputationEvent::CorruptedData);
                    }
                }
                Err(FetchError::Refused(message)) => {
                    tracing::warn!(
                        "[worker-{}] Peer {} refused chunk {}: {}",
                        worker_id,
                        peer_id,
                        chunk_index,
                        message
                    );
                    record(&reputation, peer_id, ReputationEvent::RefusedUpload);
                }
                Err(FetchError::Transport(message)) => {
                    tracing::warn!(
                        "[worker-{}] Failed to fetch chunk {} from {}: {}",
                        worker_id,
                        chunk_index,
                        peer_id,
                        message
                    );
                    record(&reputation, peer_id, ReputationEvent::ConnectionTimeout);
                }
            }
        }

        if !success {
            tracing::error!(
                "[worker-{}] Failed to download chunk {} from any peer.",
                worker_id,
                chunk_index
            );
            any_abandoned.store(true, Ordering::SeqCst);
        }
    }
}

fn record(reputation: &ReputationStore, peer_id: &str, event: ReputationEvent) {
    if let Err(e) = reputation.record(peer_id, event) {
        tracing::error!("Error updating reputation for {}: {}", peer_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn downloader(dir: &TempDir) -> SwarmDownloader {
        let storage = Arc::new(ChunkStore::open(dir.path().join("store")).unwrap());
        let reputation =
            Arc::new(ReputationStore::open(&dir.path().join("reputation.db")).unwrap());
        SwarmDownloader::new(
            "peer_self0000".to_string(),
            4000,
            storage,
            reputation,
            Arc::new(JobRegistry::new()),
            DownloadOptions {
                chunk_size: 1024,
                workers: 4,
                chunk_timeout: Duration::from_secs(1),
                buffer_size: 4096,
            },
        )
    }

    fn peer(id: &str, port: u16) -> PeerAddr {
        PeerAddr {
            id: id.to_string(),
            ip: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn order_peers_excludes_self_and_ranks_by_score() {
        let dir = TempDir::new().unwrap();
        let dl = downloader(&dir);

        // Sink one peer's score below the default.
        dl.reputation
            .record("peer_shady", ReputationEvent::CorruptedData)
            .unwrap();

        let ordered = dl.order_peers(vec![
            peer("peer_shady", 4001),
            peer("peer_self0000", 4000),
            peer("peer_clean", 4002),
        ]);

        let ids: Vec<&str> = ordered.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["peer_clean", "peer_shady"]);
        assert_eq!(ordered[0].1, ("127.0.0.1".to_string(), 4002));
    }
}
