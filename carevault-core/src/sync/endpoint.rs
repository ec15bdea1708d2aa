// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Replication endpoint abstraction.
//!
//! The remote side speaks a simple checkpointed document-replication
//! protocol: pull changes since a sequence number, push local changes,
//! report per-document acceptance. The endpoint only ever sees
//! ciphertext.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failures. Retried with backoff in live mode,
/// surfaced immediately in one-shot mode.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A document as it travels over the wire: ciphertext plus replication
/// metadata, byte-for-byte what the local storage holds.
///
/// Serializes with base64-encoded byte fields so endpoint
/// implementations can carry it over JSON transports directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub revision: String,
    #[serde(with = "bytes_base64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "bytes_base64")]
    pub content_digest: Vec<u8>,
    pub encrypted_at: u64,
    pub deleted: bool,
}

/// Serde helper encoding byte vectors as base64 strings.
mod bytes_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

/// A batch of remote changes plus the checkpoint to resume from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullBatch {
    pub documents: Vec<RemoteDocument>,
    pub checkpoint: u64,
}

/// Per-document result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Accepted,
    /// The remote holds a revision the local side has not seen; the
    /// document stays pending and the collision surfaces on pull.
    Conflict,
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub id: String,
    pub status: PushStatus,
}

/// Driver interface for a remote replication endpoint.
///
/// Deliberately blocking: the sync engine serializes all replication on
/// its own thread, and implementations own their transport timeouts.
pub trait ReplicationEndpoint: Send {
    /// Fetches remote changes after `checkpoint`, oldest first.
    fn pull_since(&mut self, checkpoint: u64) -> Result<PullBatch, TransportError>;

    /// Pushes local changes; returns one outcome per pushed document.
    fn push(&mut self, documents: &[RemoteDocument]) -> Result<Vec<PushOutcome>, TransportError>;
}

/// Scriptable in-memory endpoint for tests.
pub struct MockEndpoint {
    /// Remote state: (sequence, document) per id.
    remote: std::collections::HashMap<String, (u64, RemoteDocument)>,
    next_sequence: u64,
    /// Ids the endpoint reports as conflicted on push.
    conflicting_ids: std::collections::HashSet<String>,
    /// Number of upcoming calls that fail with `Unreachable`.
    failures_remaining: u32,
    /// Order in which documents were pushed, across all calls.
    pub push_log: Vec<String>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        MockEndpoint {
            remote: std::collections::HashMap::new(),
            next_sequence: 0,
            conflicting_ids: std::collections::HashSet::new(),
            failures_remaining: 0,
            push_log: Vec::new(),
        }
    }

    /// Seeds a document on the remote side as if another device pushed it.
    pub fn seed_remote(&mut self, document: RemoteDocument) {
        self.next_sequence += 1;
        self.remote
            .insert(document.id.clone(), (self.next_sequence, document));
    }

    /// Makes the next `n` calls fail as unreachable.
    pub fn fail_next(&mut self, n: u32) {
        self.failures_remaining = n;
    }

    /// Marks an id as conflicting on push.
    pub fn conflict_on(&mut self, id: &str) {
        self.conflicting_ids.insert(id.to_string());
    }

    pub fn remote_document(&self, id: &str) -> Option<&RemoteDocument> {
        self.remote.get(id).map(|(_, d)| d)
    }

    fn check_reachable(&mut self) -> Result<(), TransportError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(TransportError::Unreachable("scripted failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationEndpoint for MockEndpoint {
    fn pull_since(&mut self, checkpoint: u64) -> Result<PullBatch, TransportError> {
        self.check_reachable()?;

        let mut changed: Vec<(u64, RemoteDocument)> = self
            .remote
            .values()
            .filter(|(seq, _)| *seq > checkpoint)
            .cloned()
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);

        let new_checkpoint = changed
            .last()
            .map(|(seq, _)| *seq)
            .max(Some(checkpoint))
            .unwrap_or(checkpoint);

        Ok(PullBatch {
            documents: changed.into_iter().map(|(_, d)| d).collect(),
            checkpoint: new_checkpoint,
        })
    }

    fn push(&mut self, documents: &[RemoteDocument]) -> Result<Vec<PushOutcome>, TransportError> {
        self.check_reachable()?;

        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents {
            self.push_log.push(document.id.clone());

            if self.conflicting_ids.contains(&document.id) {
                outcomes.push(PushOutcome {
                    id: document.id.clone(),
                    status: PushStatus::Conflict,
                });
                continue;
            }

            self.next_sequence += 1;
            self.remote
                .insert(document.id.clone(), (self.next_sequence, document.clone()));
            outcomes.push(PushOutcome {
                id: document.id.clone(),
                status: PushStatus::Accepted,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            revision: format!("1-{}", "ab".repeat(16)),
            ciphertext: vec![1, 2, 3],
            content_digest: vec![9; 32],
            encrypted_at: 100,
            deleted: false,
        }
    }

    #[test]
    fn test_mock_pull_respects_checkpoint() {
        let mut endpoint = MockEndpoint::new();
        endpoint.seed_remote(doc("a"));
        endpoint.seed_remote(doc("b"));

        let first = endpoint.pull_since(0).unwrap();
        assert_eq!(first.documents.len(), 2);

        let second = endpoint.pull_since(first.checkpoint).unwrap();
        assert!(second.documents.is_empty());
        assert_eq!(second.checkpoint, first.checkpoint);
    }

    #[test]
    fn test_mock_scripted_failures_then_recovery() {
        let mut endpoint = MockEndpoint::new();
        endpoint.fail_next(2);

        assert!(endpoint.pull_since(0).is_err());
        assert!(endpoint.pull_since(0).is_err());
        assert!(endpoint.pull_since(0).is_ok());
    }

    #[test]
    fn test_remote_document_json_round_trip() {
        let original = doc("a");
        let json = serde_json::to_string(&original).unwrap();
        // Byte fields travel as base64 strings, not JSON arrays
        assert!(json.contains("\"ciphertext\":\"AQID\""));

        let back: RemoteDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ciphertext, original.ciphertext);
        assert_eq!(back.content_digest, original.content_digest);
        assert_eq!(back.revision, original.revision);
    }

    #[test]
    fn test_mock_push_conflict() {
        let mut endpoint = MockEndpoint::new();
        endpoint.conflict_on("b");

        let outcomes = endpoint.push(&[doc("a"), doc("b")]).unwrap();
        assert_eq!(outcomes[0].status, PushStatus::Accepted);
        assert_eq!(outcomes[1].status, PushStatus::Conflict);
        // Conflicted push does not overwrite the remote
        assert!(endpoint.remote_document("b").is_none());
    }
}
