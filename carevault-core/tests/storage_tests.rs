// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! On-disk storage behavior: schema migration and persistence across
//! process restarts, exercised through a real SQLite file.

use carevault_core::{
    Document, EncryptedStore, MemoryAuditSink, StaticKeyManager, Storage, StorageError,
    SymmetricKey,
};
use serde_json::json;

#[test]
fn test_schema_migrates_to_latest_on_open() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let storage = Storage::open(&path).unwrap();
    assert_eq!(storage.schema_version().unwrap(), 2);
}

#[test]
fn test_documents_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let key = SymmetricKey::generate();
    let keys = StaticKeyManager::new(key.clone());
    let audit = MemoryAuditSink::new();

    {
        let storage = Storage::open(&path).unwrap();
        let store = EncryptedStore::new(&storage, &keys, &audit).unwrap();
        store
            .put(&Document::new("rec-1", json!({"field": "value"})))
            .unwrap();
    }

    let storage = Storage::open(&path).unwrap();
    let store = EncryptedStore::new(&storage, &keys, &audit).unwrap();
    let doc = store.get("rec-1").unwrap();
    assert_eq!(doc.content["field"], "value");
    assert!(doc.revision.is_some());
}

#[test]
fn test_reopen_is_idempotent_on_current_schema() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    {
        let storage = Storage::open(&path).unwrap();
        assert_eq!(storage.schema_version().unwrap(), 2);
    }
    // Opening again must not rerun migrations or disturb the version
    let storage = Storage::open(&path).unwrap();
    assert_eq!(storage.schema_version().unwrap(), 2);
}

#[test]
fn test_pending_push_flag_persists() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let audit = MemoryAuditSink::new();

    {
        let storage = Storage::open(&path).unwrap();
        let store = EncryptedStore::new(&storage, &keys, &audit).unwrap();
        store
            .put(&Document::new("rec-1", json!({"n": 1})))
            .unwrap();
    }

    let storage = Storage::open(&path).unwrap();
    let pending = storage.pending_push().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "rec-1");
}

#[test]
fn test_concurrent_cas_writers_never_lose_an_update() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    Storage::open(&path)
        .unwrap()
        .put_raw("doc-1", None, b"seed", b"digest", 0)
        .unwrap();

    // Two connections race fetch-then-CAS loops against the same row.
    // Every accepted write must bump the generation exactly once.
    let mut handles = Vec::new();
    for writer in 0..2u8 {
        let path = path.clone();
        handles.push(std::thread::spawn(move || {
            let storage = Storage::open(&path).unwrap();
            let mut accepted = 0u64;
            for round in 0..20 {
                let current = storage.fetch_raw("doc-1").unwrap().unwrap();
                let body = format!("writer-{}-round-{}", writer, round);
                match storage.put_raw(
                    "doc-1",
                    Some(&current.revision),
                    body.as_bytes(),
                    b"digest",
                    1,
                ) {
                    Ok(_) => accepted += 1,
                    Err(StorageError::RevisionConflict(_)) => {}
                    Err(e) => panic!("unexpected storage error: {}", e),
                }
            }
            accepted
        }));
    }
    let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let storage = Storage::open(&path).unwrap();
    let doc = storage.fetch_raw("doc-1").unwrap().unwrap();
    assert_eq!(doc.revision.generation(), 1 + accepted);
}
