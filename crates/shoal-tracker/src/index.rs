//! In-memory file index and peer registry
//!
//! Two independent mutexes guard the two maps. Handlers that need both
//! snapshot what they need under the file-index lock, release it, then
//! consult the peer registry, so the locks are never held nested.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use shoal_core::proto::{QueryFileReply, RegisterPayload, SearchReply, StatusReply};
use shoal_core::{PeerAddr, SearchHit};

/// One indexed file: its descriptor fields plus the set of peers
/// currently advertising it.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    size: u64,
    chunk_count: u32,
    chunk_hashes: Vec<String>,
    peers: HashSet<String>,
}

/// Tracker state shared by all connection handlers
#[derive(Default)]
pub struct TrackerIndex {
    file_index: Mutex<HashMap<String, FileEntry>>,
    peer_registry: Mutex<HashMap<String, (String, u16)>>,
}

impl TrackerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer and the files it announces. The peer's IP is the
    /// source address of its control connection; the payload only
    /// contributes the listen port. Re-registration refreshes the
    /// address and unions the file set. If a file is already indexed,
    /// the existing descriptor is authoritative.
    pub fn register(&self, payload: &RegisterPayload, client_ip: IpAddr) -> StatusReply {
        {
            let mut registry = self.peer_registry.lock().unwrap();
            registry.insert(
                payload.peer_id.clone(),
                (client_ip.to_string(), payload.port),
            );
        }
        tracing::info!(
            "Registered peer {} at {}:{}",
            payload.peer_id,
            client_ip,
            payload.port
        );

        let mut index = self.file_index.lock().unwrap();
        for file in &payload.files {
            let entry = index
                .entry(file.hash.clone())
                .or_insert_with(|| FileEntry {
                    name: file.name.clone(),
                    size: file.size,
                    chunk_count: file.chunk_count,
                    chunk_hashes: file.chunk_hashes.clone(),
                    peers: HashSet::new(),
                });
            if entry.peers.insert(payload.peer_id.clone()) {
                tracing::info!(
                    "Indexed file {} (hash: {}...) for peer {}",
                    file.name,
                    &file.hash[..file.hash.len().min(10)],
                    payload.peer_id
                );
            }
        }

        StatusReply::Success {
            message: "Registered successfully".to_string(),
        }
    }

    /// Look up a file and the peers that can serve it, filtered down to
    /// peers with a live control connection.
    pub fn query_file(&self, file_hash: &str) -> QueryFileReply {
        let (name, size, chunk_count, chunk_hashes, peer_ids) = {
            let index = self.file_index.lock().unwrap();
            match index.get(file_hash) {
                Some(entry) => (
                    entry.name.clone(),
                    entry.size,
                    entry.chunk_count,
                    entry.chunk_hashes.clone(),
                    entry.peers.iter().cloned().collect::<Vec<_>>(),
                ),
                None => {
                    return QueryFileReply::Error {
                        message: "File not found".to_string(),
                    }
                }
            }
        };

        let peers = {
            let registry = self.peer_registry.lock().unwrap();
            let mut peers: Vec<PeerAddr> = peer_ids
                .into_iter()
                .filter_map(|id| {
                    registry.get(&id).map(|(ip, port)| PeerAddr {
                        id,
                        ip: ip.clone(),
                        port: *port,
                    })
                })
                .collect();
            // Deterministic reply order regardless of set iteration
            peers.sort_by(|a, b| a.id.cmp(&b.id));
            peers
        };

        if peers.is_empty() {
            return QueryFileReply::Error {
                message: "File found, but no active peers available".to_string(),
            };
        }

        QueryFileReply::Success {
            file_name: name,
            file_size: size,
            chunk_count,
            chunk_hashes,
            peers,
        }
    }

    /// Case-insensitive substring search over display names.
    pub fn search(&self, query: &str) -> SearchReply {
        let needle = query.to_lowercase();

        let candidates: Vec<(String, String, u64, Vec<String>)> = {
            let index = self.file_index.lock().unwrap();
            index
                .iter()
                .filter(|(_, entry)| entry.name.to_lowercase().contains(&needle))
                .map(|(hash, entry)| {
                    (
                        hash.clone(),
                        entry.name.clone(),
                        entry.size,
                        entry.peers.iter().cloned().collect(),
                    )
                })
                .collect()
        };

        let registry = self.peer_registry.lock().unwrap();
        let mut results: Vec<SearchHit> = candidates
            .into_iter()
            .map(|(hash, name, size, peer_ids)| SearchHit {
                hash,
                name,
                size,
                seeders: peer_ids
                    .iter()
                    .filter(|id| registry.contains_key(*id))
                    .count() as u32,
            })
            .collect();
        results.sort_by(|a, b| b.seeders.cmp(&a.seeders).then(a.name.cmp(&b.name)));

        SearchReply::Success { results }
    }

    /// Remove a disconnected peer from the registry and from every file
    /// entry, pruning entries nobody advertises anymore.
    pub fn deregister(&self, peer_id: &str) {
        {
            let mut registry = self.peer_registry.lock().unwrap();
            if registry.remove(peer_id).is_some() {
                tracing::info!("Deregistered peer {}", peer_id);
            }
        }

        let mut index = self.file_index.lock().unwrap();
        index.retain(|hash, entry| {
            entry.peers.remove(peer_id);
            if entry.peers.is_empty() {
                tracing::info!(
                    "Pruned file {}... from index (no peers)",
                    &hash[..hash.len().min(10)]
                );
                false
            } else {
                true
            }
        });
    }

    /// True iff the peer currently has a live registration.
    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.peer_registry.lock().unwrap().contains_key(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::FileDescriptor;
    use std::net::Ipv4Addr;

    fn descriptor(name: &str, hash: &str) -> FileDescriptor {
        FileDescriptor {
            name: name.to_string(),
            size: 2048,
            hash: hash.repeat(32),
            chunk_count: 2,
            chunk_hashes: vec!["aa".repeat(32), "bb".repeat(32)],
        }
    }

    fn register(index: &TrackerIndex, peer_id: &str, port: u16, files: Vec<FileDescriptor>) {
        index.register(
            &RegisterPayload {
                peer_id: peer_id.to_string(),
                port,
                files,
            },
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        );
    }

    #[test]
    fn register_then_query() {
        let index = TrackerIndex::new();
        let desc = descriptor("test.bin", "0f");
        register(&index, "peer_one", 4001, vec![desc.clone()]);

        match index.query_file(&desc.hash) {
            QueryFileReply::Success {
                file_name,
                file_size,
                chunk_count,
                chunk_hashes,
                peers,
            } => {
                assert_eq!(file_name, "test.bin");
                assert_eq!(file_size, 2048);
                assert_eq!(chunk_count, 2);
                assert_eq!(chunk_hashes.len(), 2);
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].id, "peer_one");
                assert_eq!(peers[0].ip, "127.0.0.1");
                assert_eq!(peers[0].port, 4001);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn query_unknown_hash() {
        let index = TrackerIndex::new();
        match index.query_file(&"ff".repeat(32)) {
            QueryFileReply::Error { message } => assert_eq!(message, "File not found"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let index = TrackerIndex::new();
        let desc = descriptor("twice.bin", "1c");
        register(&index, "peer_one", 4001, vec![desc.clone()]);
        register(&index, "peer_one", 4001, vec![desc.clone()]);

        match index.query_file(&desc.hash) {
            QueryFileReply::Success { peers, .. } => assert_eq!(peers.len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn existing_descriptor_is_authoritative() {
        let index = TrackerIndex::new();
        let desc = descriptor("original.bin", "2d");
        register(&index, "peer_one", 4001, vec![desc.clone()]);

        // Second peer announces the same hash with different metadata.
        let mut conflicting = desc.clone();
        conflicting.name = "imposter.bin".to_string();
        conflicting.chunk_hashes = vec!["ee".repeat(32), "ff".repeat(32)];
        register(&index, "peer_two", 4002, vec![conflicting]);

        match index.query_file(&desc.hash) {
            QueryFileReply::Success {
                file_name,
                chunk_hashes,
                peers,
                ..
            } => {
                assert_eq!(file_name, "original.bin");
                assert_eq!(chunk_hashes, desc.chunk_hashes);
                assert_eq!(peers.len(), 2);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn source_ip_overrides_nothing_client_sends() {
        // The register payload has no IP field at all; the tracker can
        // only ever record what it observed on the socket.
        let index = TrackerIndex::new();
        let desc = descriptor("ip.bin", "3e");
        index.register(
            &RegisterPayload {
                peer_id: "peer_far".to_string(),
                port: 5000,
                files: vec![desc.clone()],
            },
            "10.1.2.3".parse().unwrap(),
        );

        match index.query_file(&desc.hash) {
            QueryFileReply::Success { peers, .. } => assert_eq!(peers[0].ip, "10.1.2.3"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn deregister_prunes_orphaned_entries() {
        let index = TrackerIndex::new();
        let shared = descriptor("shared.bin", "4a");
        let solo = descriptor("solo.bin", "5b");
        register(&index, "peer_one", 4001, vec![shared.clone(), solo.clone()]);
        register(&index, "peer_two", 4002, vec![shared.clone()]);

        index.deregister("peer_one");

        assert!(!index.is_registered("peer_one"));
        // Entry with a remaining peer survives, the orphan is pruned.
        assert!(matches!(
            index.query_file(&shared.hash),
            QueryFileReply::Success { .. }
        ));
        assert!(matches!(
            index.query_file(&solo.hash),
            QueryFileReply::Error { .. }
        ));
    }

    #[test]
    fn query_filters_dead_peers() {
        let index = TrackerIndex::new();
        let desc = descriptor("gone.bin", "6c");
        register(&index, "peer_one", 4001, vec![desc.clone()]);

        // Simulate a stale peer set entry by removing only the registry
        // row (deregister would also clean the file entry).
        index.peer_registry.lock().unwrap().remove("peer_one");

        match index.query_file(&desc.hash) {
            QueryFileReply::Error { message } => {
                assert_eq!(message, "File found, but no active peers available")
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn search_matches_substring_case_insensitive() {
        let index = TrackerIndex::new();
        register(
            &index,
            "peer_one",
            4001,
            vec![descriptor("Big_Buck_Bunny.mkv", "7d"), descriptor("notes.txt", "8e")],
        );
        register(&index, "peer_two", 4002, vec![descriptor("Big_Buck_Bunny.mkv", "7d")]);

        match index.search("bunny") {
            SearchReply::Success { results } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].name, "Big_Buck_Bunny.mkv");
                assert_eq!(results[0].seeders, 2);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match index.search("zzz") {
            SearchReply::Success { results } => assert!(results.is_empty()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
