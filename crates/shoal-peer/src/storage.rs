//! Chunk storage
//!
//! Tracks which files this peer holds and which chunks of each are
//! present. Files the peer originally shared are never copied; their
//! chunks are read out of the source file by offset. Downloaded chunks
//! live as individual `<hash>.<index>` files until reassembly.
//!
//! One mutex guards the in-memory maps and metadata persistence; chunk
//! file I/O happens outside it, which is safe because chunk filenames
//! are unique per (hash, index) and writes are idempotent.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use shoal_core::{hash, Error, FileDescriptor, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaState {
    file_metadata: HashMap<String, FileDescriptor>,
    chunk_tracker: HashMap<String, BTreeSet<u32>>,
    file_locations: HashMap<String, PathBuf>,
}

pub struct ChunkStore {
    base_dir: PathBuf,
    downloads_dir: PathBuf,
    completed_dir: PathBuf,
    meta_path: PathBuf,
    state: Mutex<MetaState>,
}

impl ChunkStore {
    /// Open the store rooted at `base_dir`, creating the directory tree
    /// and loading persisted metadata. A metadata file that fails to
    /// parse is replaced by a fresh empty record.
    pub fn open(base_dir: PathBuf) -> Result<Self> {
        let downloads_dir = base_dir.join("downloads");
        let completed_dir = base_dir.join("completed");
        let meta_path = base_dir.join("storage_meta.json");

        std::fs::create_dir_all(&downloads_dir)?;
        std::fs::create_dir_all(&completed_dir)?;

        let state = match std::fs::read_to_string(&meta_path) {
            Ok(content) => match serde_json::from_str::<MetaState>(&content) {
                Ok(state) => {
                    tracing::info!("Loaded storage metadata from {}", meta_path.display());
                    state
                }
                Err(e) => {
                    tracing::error!("Error loading metadata, starting fresh: {}", e);
                    MetaState::default()
                }
            },
            Err(_) => {
                tracing::info!("No existing metadata file found. Starting fresh.");
                MetaState::default()
            }
        };

        let store = Self {
            base_dir,
            downloads_dir,
            completed_dir,
            meta_path,
            state: Mutex::new(state),
        };
        store.save(&store.state.lock().unwrap());
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn completed_dir(&self) -> &Path {
        &self.completed_dir
    }

    /// Start sharing a local file: compute its descriptor in one pass,
    /// point its chunks at the original path, and mark every chunk
    /// present. The file is not copied.
    pub fn add_share(&self, path: &Path, chunk_size: usize) -> Result<FileDescriptor> {
        let abs_path = std::fs::canonicalize(path)?;
        let descriptor = hash::describe_file(&abs_path, chunk_size)?;

        let mut state = self.state.lock().unwrap();
        let all_chunks: BTreeSet<u32> = (0..descriptor.chunk_count).collect();
        state
            .file_metadata
            .insert(descriptor.hash.clone(), descriptor.clone());
        state
            .file_locations
            .insert(descriptor.hash.clone(), abs_path.clone());
        state.chunk_tracker.insert(descriptor.hash.clone(), all_chunks);
        self.save(&state);
        drop(state);

        tracing::info!(
            "Now sharing '{}' from {}",
            descriptor.name,
            abs_path.display()
        );
        Ok(descriptor)
    }

    /// Register a file we intend to download, with an empty chunk set.
    /// Idempotent: a hash we already track keeps its existing descriptor
    /// and chunk set, so a share descriptor wins over a download of the
    /// same file.
    pub fn add_download(&self, descriptor: &FileDescriptor) {
        let mut state = self.state.lock().unwrap();
        if state.file_metadata.contains_key(&descriptor.hash) {
            tracing::info!("Already tracking file: {}", descriptor.name);
            return;
        }
        state
            .file_metadata
            .insert(descriptor.hash.clone(), descriptor.clone());
        state
            .chunk_tracker
            .insert(descriptor.hash.clone(), BTreeSet::new());
        self.save(&state);
        tracing::info!("Added new download target: {}", descriptor.name);
    }

    /// Write one verified chunk to disk and mark it present. The chunk
    /// set is only updated after the write succeeds.
    pub fn store_chunk(&self, file_hash: &str, chunk_index: u32, data: &[u8]) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if !state.file_metadata.contains_key(file_hash) {
                return Err(Error::NotFound(format!(
                    "chunk received for untracked file {}",
                    file_hash
                )));
            }
        }

        let chunk_path = self.chunk_path(file_hash, chunk_index);
        std::fs::write(&chunk_path, data)?;

        let mut state = self.state.lock().unwrap();
        state
            .chunk_tracker
            .entry(file_hash.to_string())
            .or_default()
            .insert(chunk_index);
        self.save(&state);

        tracing::debug!(
            "Stored chunk {} for file {}...",
            chunk_index,
            &file_hash[..file_hash.len().min(10)]
        );
        Ok(())
    }

    /// Fetch chunk bytes for serving. Chunks of an original share are
    /// read from the source file by offset; downloaded chunks from their
    /// own files. `None` if we do not have the chunk.
    pub fn read_chunk(
        &self,
        file_hash: &str,
        chunk_index: u32,
        chunk_size: usize,
    ) -> Result<Option<Vec<u8>>> {
        let source = {
            let state = self.state.lock().unwrap();
            let owned = state
                .chunk_tracker
                .get(file_hash)
                .is_some_and(|chunks| chunks.contains(&chunk_index));
            if !owned {
                return Ok(None);
            }
            state.file_locations.get(file_hash).cloned()
        };

        // Disk reads stay outside the lock.
        if let Some(path) = source {
            return Ok(Some(hash::read_chunk_at(&path, chunk_index, chunk_size)?));
        }

        let chunk_path = self.chunk_path(file_hash, chunk_index);
        match std::fs::read(&chunk_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Chunk indices still needed for a file. Empty iff complete (or the
    /// file is untracked).
    pub fn missing(&self, file_hash: &str) -> BTreeSet<u32> {
        let state = self.state.lock().unwrap();
        let Some(descriptor) = state.file_metadata.get(file_hash) else {
            return BTreeSet::new();
        };
        let owned = state.chunk_tracker.get(file_hash);
        (0..descriptor.chunk_count)
            .filter(|i| !owned.is_some_and(|chunks| chunks.contains(i)))
            .collect()
    }

    pub fn is_complete(&self, file_hash: &str) -> bool {
        let state = self.state.lock().unwrap();
        let Some(descriptor) = state.file_metadata.get(file_hash) else {
            return false;
        };
        state
            .chunk_tracker
            .get(file_hash)
            .is_some_and(|chunks| chunks.len() as u32 == descriptor.chunk_count)
    }

    /// Heuristic used before reassembly: the first and last chunk files
    /// of a downloaded file are physically on disk.
    pub fn has_physical_chunks(&self, file_hash: &str, chunk_count: u32) -> bool {
        if chunk_count == 0 {
            return false;
        }
        self.chunk_path(file_hash, 0).exists()
            && self.chunk_path(file_hash, chunk_count - 1).exists()
    }

    pub fn descriptor(&self, file_hash: &str) -> Option<FileDescriptor> {
        self.state
            .lock()
            .unwrap()
            .file_metadata
            .get(file_hash)
            .cloned()
    }

    /// Every descriptor this peer tracks (shares and downloads alike);
    /// this is what gets announced to the tracker.
    pub fn tracked_files(&self) -> Vec<FileDescriptor> {
        self.state
            .lock()
            .unwrap()
            .file_metadata
            .values()
            .cloned()
            .collect()
    }

    /// Path of the original file for a share, if this peer was the
    /// original sharer.
    pub fn seed_source(&self, file_hash: &str) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .file_locations
            .get(file_hash)
            .cloned()
    }

    /// Concatenate the chunk files of a completed download into
    /// `completed/<name>` and return the output path. The caller
    /// verifies the whole-file digest.
    pub fn reassemble(&self, file_hash: &str) -> Result<PathBuf> {
        use std::io::Write;

        let descriptor = self
            .descriptor(file_hash)
            .ok_or_else(|| Error::NotFound(format!("untracked file {}", file_hash)))?;

        let output_path = self.completed_dir.join(&descriptor.name);
        let mut output = std::io::BufWriter::new(std::fs::File::create(&output_path)?);

        for i in 0..descriptor.chunk_count {
            let chunk_path = self.chunk_path(file_hash, i);
            let data = std::fs::read(&chunk_path)?;
            output.write_all(&data)?;
        }
        output.flush()?;

        tracing::info!(
            "Reassembled file {}... to {}",
            &file_hash[..file_hash.len().min(10)],
            output_path.display()
        );
        Ok(output_path)
    }

    /// Where a reassembled copy of this file would live.
    pub fn completed_path(&self, file_hash: &str) -> Option<PathBuf> {
        self.descriptor(file_hash)
            .map(|d| self.completed_dir.join(d.name))
    }

    fn chunk_path(&self, file_hash: &str, chunk_index: u32) -> PathBuf {
        self.downloads_dir
            .join(format!("{}.{}", file_hash, chunk_index))
    }

    /// Persist the metadata record with write-to-temp + rename so a
    /// crash mid-write cannot corrupt it.
    fn save(&self, state: &MetaState) {
        let tmp_path = self.meta_path.with_extension("json.tmp");
        let result = serde_json::to_vec_pretty(state)
            .map_err(shoal_core::Error::from)
            .and_then(|bytes| {
                std::fs::write(&tmp_path, bytes)?;
                std::fs::rename(&tmp_path, &self.meta_path)?;
                Ok(())
            });
        if let Err(e) = result {
            tracing::error!(
                "Could not save metadata to {}: {}",
                self.meta_path.display(),
                e
            );
        }
    }
}
