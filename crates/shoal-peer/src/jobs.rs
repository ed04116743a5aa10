//! Download job registry
//!
//! Active jobs are keyed by file hash; finished jobs move to a history
//! list, newest first. UIs poll snapshots of both.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Downloading,
    Complete,
    Stalled,
    #[serde(rename = "Reassembly Failed")]
    ReassemblyFailed,
    #[serde(rename = "Missing Chunks")]
    MissingChunks,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Downloading => "Downloading",
            JobStatus::Complete => "Complete",
            JobStatus::Stalled => "Stalled",
            JobStatus::ReassemblyFailed => "Reassembly Failed",
            JobStatus::MissingChunks => "Missing Chunks",
            JobStatus::Error => "Error",
        };
        write!(f, "{}", label)
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != JobStatus::Downloading
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub file_hash: String,
    pub name: String,
    pub size: u64,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    /// completed / total * 100
    pub progress: f64,
    pub status: JobStatus,
    pub final_path: Option<PathBuf>,
    /// Unix seconds when the job reached a terminal state
    pub finished_at: Option<u64>,
}

impl JobState {
    fn new(file_hash: String, name: String, size: u64, total_chunks: u32) -> Self {
        Self {
            file_hash,
            name,
            size,
            total_chunks,
            completed_chunks: 0,
            progress: 0.0,
            status: JobStatus::Downloading,
            final_path: None,
            finished_at: None,
        }
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total_chunks == 0 {
            100.0
        } else {
            self.completed_chunks as f64 / self.total_chunks as f64 * 100.0
        };
    }
}

/// Snapshot handed to the observation interface.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadsSnapshot {
    pub active: HashMap<String, JobState>,
    pub history: Vec<JobState>,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, JobState>,
    history: Vec<JobState>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a starting job. A second download of a hash already in
    /// flight is ignored.
    pub fn start(&self, file_hash: &str, name: &str, size: u64, total_chunks: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.active.contains_key(file_hash) {
            tracing::warn!("Download already active for {}", file_hash);
            return false;
        }
        inner.active.insert(
            file_hash.to_string(),
            JobState::new(file_hash.to_string(), name.to_string(), size, total_chunks),
        );
        true
    }

    /// Count one more finished chunk toward a job's progress.
    pub fn chunk_done(&self, file_hash: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.active.get_mut(file_hash) {
            job.completed_chunks += 1;
            job.recompute_progress();
        }
    }

    /// Account for chunks that were already present before the workers
    /// started.
    pub fn chunks_preowned(&self, file_hash: &str, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.active.get_mut(file_hash) {
            job.completed_chunks += count;
            job.recompute_progress();
        }
    }

    /// Move a job to its terminal state and into history (newest first).
    pub fn finish(&self, file_hash: &str, status: JobStatus, final_path: Option<PathBuf>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut job) = inner.active.remove(file_hash) else {
            return;
        };
        job.status = status;
        job.final_path = final_path;
        job.finished_at = Some(unix_now());
        job.recompute_progress();
        inner.history.insert(0, job);
    }

    pub fn snapshot(&self) -> DownloadsSnapshot {
        let inner = self.inner.lock().unwrap();
        DownloadsSnapshot {
            active: inner.active.clone(),
            history: inner.history.clone(),
        }
    }

    /// Status of a finished job, if any.
    pub fn finished_status(&self, file_hash: &str) -> Option<JobStatus> {
        let inner = self.inner.lock().unwrap();
        inner
            .history
            .iter()
            .find(|job| job.file_hash == file_hash)
            .map(|job| job.status)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_moves_to_history() {
        let registry = JobRegistry::new();
        assert!(registry.start(&"aa".repeat(32), "file.bin", 4096, 4));
        // Duplicate start is rejected while active.
        assert!(!registry.start(&"aa".repeat(32), "file.bin", 4096, 4));

        registry.chunk_done(&"aa".repeat(32));
        registry.chunk_done(&"aa".repeat(32));

        let snapshot = registry.snapshot();
        let job = &snapshot.active[&"aa".repeat(32)];
        assert_eq!(job.completed_chunks, 2);
        assert!((job.progress - 50.0).abs() < 0.01);

        registry.finish(&"aa".repeat(32), JobStatus::Complete, None);
        let snapshot = registry.snapshot();
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].status, JobStatus::Complete);
        assert!(snapshot.history[0].finished_at.is_some());
        assert_eq!(
            registry.finished_status(&"aa".repeat(32)),
            Some(JobStatus::Complete)
        );
    }

    #[test]
    fn history_is_newest_first() {
        let registry = JobRegistry::new();
        registry.start("hash_one", "one.bin", 10, 1);
        registry.finish("hash_one", JobStatus::Stalled, None);
        registry.start("hash_two", "two.bin", 10, 1);
        registry.finish("hash_two", JobStatus::Complete, None);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.history[0].file_hash, "hash_two");
        assert_eq!(snapshot.history[1].file_hash, "hash_one");
    }

    #[test]
    fn status_serializes_with_spaces() {
        assert_eq!(
            serde_json::to_string(&JobStatus::ReassemblyFailed).unwrap(),
            r#""Reassembly Failed""#
        );
        assert_eq!(JobStatus::MissingChunks.to_string(), "Missing Chunks");
    }
}
