//! Local peer reputation
//!
//! Every peer keeps its own EWMA-smoothed opinion of the peers it has
//! interacted with. The score biases candidate ordering during
//! downloads; misbehaving peers sink to the back of the line and get
//! tried last. One mutex covers every read and write so a batch
//! ordering always sees a consistent snapshot.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::Serialize;

use shoal_core::{Error, Result};

const ALPHA: f64 = 0.8;
const BETA: f64 = 0.2;
pub const DEFAULT_SCORE: f64 = 10.0;

/// Everything that can happen during an interaction with another peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationEvent {
    SuccessfulUpload,
    SuccessfulDownload,
    VerifiedIntegrity,
    ConnectionTimeout,
    RefusedUpload,
    CorruptedData,
}

impl ReputationEvent {
    /// Fixed per-event delta fed into the EWMA update.
    pub fn delta(self) -> f64 {
        match self {
            ReputationEvent::SuccessfulUpload => 3.0,
            ReputationEvent::SuccessfulDownload => 3.0,
            ReputationEvent::VerifiedIntegrity => 2.0,
            ReputationEvent::ConnectionTimeout => -1.0,
            ReputationEvent::RefusedUpload => -3.0,
            ReputationEvent::CorruptedData => -5.0,
        }
    }
}

/// One row of the reputation table, as exposed to UIs and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReputationEntry {
    pub peer_id: String,
    pub score: f64,
    pub interactions: u64,
}

pub struct ReputationStore {
    conn: Mutex<Connection>,
}

impl ReputationStore {
    /// Open or create the reputation database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reputation (
                peer_id TEXT PRIMARY KEY,
                score REAL NOT NULL,
                interactions INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;
        tracing::info!("Reputation database initialized at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply one observed event:
    /// `score_new = ALPHA * score_old + BETA * delta`, bumping the
    /// interaction counter. Returns the new score.
    pub fn record(&self, peer_id: &str, event: ReputationEvent) -> Result<f64> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<(f64, u64)> = conn
            .query_row(
                "SELECT score, interactions FROM reputation WHERE peer_id = ?",
                params![peer_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(db_err(e)),
            })?;

        let (old_score, interactions) = existing.unwrap_or((DEFAULT_SCORE, 0));
        let new_score = ALPHA * old_score + BETA * event.delta();

        conn.execute(
            r#"
            INSERT INTO reputation (peer_id, score, interactions)
            VALUES (?, ?, ?)
            ON CONFLICT(peer_id) DO UPDATE SET
                score = excluded.score,
                interactions = excluded.interactions
            "#,
            params![peer_id, new_score, interactions + 1],
        )
        .map_err(db_err)?;

        tracing::debug!(
            "Updated reputation for {}: {:.2} -> {:.2} ({:?})",
            peer_id,
            old_score,
            new_score,
            event
        );
        Ok(new_score)
    }

    /// Current score for a peer; peers we have never interacted with
    /// score the default.
    pub fn score(&self, peer_id: &str) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        lookup_score(&conn, peer_id)
    }

    /// Sort candidate peers by score, best first. Ties keep the input
    /// order. A database error degrades to default scores rather than
    /// failing the download that asked.
    pub fn order(&self, peer_ids: &[String]) -> Vec<(String, f64)> {
        let conn = self.conn.lock().unwrap();

        let mut scored: Vec<(String, f64)> = peer_ids
            .iter()
            .map(|id| {
                let score = lookup_score(&conn, id).unwrap_or_else(|e| {
                    tracing::error!("Error reading reputation for {}: {}", id, e);
                    DEFAULT_SCORE
                });
                (id.clone(), score)
            })
            .collect();

        // Stable sort keeps ties in input order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Every known row, for the observation interface.
    pub fn snapshot(&self) -> Result<Vec<ReputationEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT peer_id, score, interactions FROM reputation ORDER BY score DESC")
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ReputationEntry {
                    peer_id: row.get(0)?,
                    score: row.get(1)?,
                    interactions: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(rows)
    }
}

fn lookup_score(conn: &Connection, peer_id: &str) -> Result<f64> {
    conn.query_row(
        "SELECT score FROM reputation WHERE peer_id = ?",
        params![peer_id],
        |row| row.get(0),
    )
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(DEFAULT_SCORE),
        e => Err(db_err(e)),
    })
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> ReputationStore {
        ReputationStore::open(&dir.path().join("reputation.db")).unwrap()
    }

    #[test]
    fn corrupted_data_from_default_scores_seven() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let score = store
            .record("peer_bad", ReputationEvent::CorruptedData)
            .unwrap();
        assert!((score - 7.0).abs() < 1e-9);
    }

    #[test]
    fn ewma_sequence_matches_closed_form() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = store
            .record("peer_x", ReputationEvent::SuccessfulUpload)
            .unwrap();
        assert!((first - 8.6).abs() < 1e-9);

        let second = store
            .record("peer_x", ReputationEvent::VerifiedIntegrity)
            .unwrap();
        assert!((second - 7.28).abs() < 1e-9);
    }

    #[test]
    fn interactions_count_every_event() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .record("peer_y", ReputationEvent::SuccessfulDownload)
            .unwrap();
        store
            .record("peer_y", ReputationEvent::ConnectionTimeout)
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].peer_id, "peer_y");
        assert_eq!(snapshot[0].interactions, 2);
    }

    #[test]
    fn order_prefers_higher_scores() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.record("peer_bad", ReputationEvent::CorruptedData).unwrap();
        store
            .record("peer_good", ReputationEvent::SuccessfulDownload)
            .unwrap();

        let ids = vec![
            "peer_bad".to_string(),
            "peer_unknown".to_string(),
            "peer_good".to_string(),
        ];
        let ordered = store.order(&ids);
        assert_eq!(ordered[0].0, "peer_unknown"); // default 10.0
        assert_eq!(ordered[1].0, "peer_good");
        assert_eq!(ordered[2].0, "peer_bad");
    }

    #[test]
    fn order_is_stable_for_unknown_peers() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let ids: Vec<String> = ["c", "a", "b"].iter().map(|s| s.to_string()).collect();
        let ordered = store.order(&ids);
        let names: Vec<&str> = ordered.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert!(ordered.iter().all(|(_, s)| (*s - DEFAULT_SCORE).abs() < 1e-9));
    }

    #[test]
    fn scores_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reputation.db");

        {
            let store = ReputationStore::open(&path).unwrap();
            store
                .record("peer_z", ReputationEvent::RefusedUpload)
                .unwrap();
        }

        let store = ReputationStore::open(&path).unwrap();
        let score = store.score("peer_z").unwrap();
        assert!((score - 7.4).abs() < 1e-9);
    }
}
