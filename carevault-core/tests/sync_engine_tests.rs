// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync engine integration tests: replication, priority, withholding,
//! conflict capture and live-mode backoff.

use std::time::{Duration, Instant};

use carevault_core::sync::MockEndpoint;
use carevault_core::{
    Backoff, Document, EncryptedStore, MemoryAuditSink, MergeStrategy, StaticKeyManager, Storage,
    StrategyTable, SymmetricKey, SyncConfig, SyncEngine, SyncStateKind,
};
use serde_json::json;

fn seeded_engine(
    documents: &[(&str, serde_json::Value)],
    keys: &StaticKeyManager,
    config: SyncConfig,
) -> SyncEngine<MockEndpoint> {
    let storage = Storage::in_memory().unwrap();
    let audit = MemoryAuditSink::new();
    {
        let store = EncryptedStore::new(&storage, keys, &audit).unwrap();
        for (id, content) in documents {
            store.put(&Document::new(*id, content.clone())).unwrap();
        }
    }
    SyncEngine::new(storage, MockEndpoint::new(), config)
}

#[test]
fn test_roundtrip_between_two_devices() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let audit = MemoryAuditSink::new();

    // Device A writes and pushes
    let mut device_a = seeded_engine(
        &[("obs-1", json!({"note": "written on A", "updated_at": 100}))],
        &keys,
        SyncConfig::default(),
    );
    let report = device_a.sync_once().unwrap();
    assert_eq!(report.pushed, 1);

    // Device B pulls the ciphertext A pushed, byte for byte
    let mut endpoint_b = MockEndpoint::new();
    let remote = device_a.endpoint().remote_document("obs-1").unwrap().clone();
    endpoint_b.seed_remote(remote);

    let mut device_b = SyncEngine::new(Storage::in_memory().unwrap(), endpoint_b, SyncConfig::default());
    let report = device_b.pull_once().unwrap();
    assert_eq!(report.pulled, 1);

    // Same key decrypts on B
    let store_b = EncryptedStore::new(device_b.storage(), &keys, &audit).unwrap();
    let document = store_b.get("obs-1").unwrap();
    assert_eq!(document.content["note"], "written on A");
}

#[test]
fn test_priority_queue_sends_high_before_low() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let config = SyncConfig {
        priority: Some(Box::new(
            |id: &str| if id.starts_with("high") { 2 } else { 1 },
        )),
        ..Default::default()
    };

    let mut engine = seeded_engine(
        &[
            ("low-1", json!({"severity": 1})),
            ("high-1", json!({"severity": 5})),
            ("high-2", json!({"severity": 4})),
            ("low-2", json!({"severity": 1})),
        ],
        &keys,
        config,
    );

    engine.push_once().unwrap();

    let log = &engine.endpoint().push_log;
    assert!(log[0].starts_with("high"));
    assert!(log[1].starts_with("high"));
    assert!(log[2].starts_with("low"));
    assert!(log[3].starts_with("low"));
}

#[test]
fn test_withheld_documents_report_their_reason() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let config = SyncConfig {
        ready: Some(Box::new(|id: &str| {
            if id == "draft" {
                Err("record incomplete".to_string())
            } else {
                Ok(())
            }
        })),
        ..Default::default()
    };

    let mut engine = seeded_engine(
        &[("draft", json!({"wip": true})), ("final", json!({"ok": true}))],
        &keys,
        config,
    );

    let report = engine.push_once().unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.withheld.len(), 1);
    assert_eq!(report.withheld[0].id, "draft");
    assert_eq!(report.withheld[0].reason, "record incomplete");
    assert!(engine.endpoint().remote_document("draft").is_none());
}

#[test]
fn test_pull_collision_resolved_through_store() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());

    // A remote edit of obs-1 produced on another device under the same key
    let mut other_device = seeded_engine(
        &[("obs-1", json!({"severity": 5, "updated_at": 200}))],
        &keys,
        SyncConfig::default(),
    );
    other_device.push_once().unwrap();
    let remote = other_device
        .endpoint()
        .remote_document("obs-1")
        .unwrap()
        .clone();

    // This device has its own pending edit of the same id
    let mut endpoint = MockEndpoint::new();
    endpoint.seed_remote(remote);
    let mut engine = {
        let storage = Storage::in_memory().unwrap();
        let audit = MemoryAuditSink::new();
        {
            let store = EncryptedStore::new(&storage, &keys, &audit).unwrap();
            store
                .put(&Document::new(
                    "obs-1",
                    json!({"severity": 2, "updated_at": 300}),
                ))
                .unwrap();
        }
        SyncEngine::new(storage, endpoint, SyncConfig::default())
    };

    let report = engine.pull_once().unwrap();
    assert_eq!(report.conflicts, 1);

    // Resolve through the store: severity merges to the maximum
    let audit = MemoryAuditSink::new();
    let store = EncryptedStore::new(engine.storage(), &keys, &audit).unwrap();
    let conflicts = store.unresolved_conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);

    let table = StrategyTable::new().with_field("severity", MergeStrategy::Highest);
    let merged = store.resolve_conflict(&conflicts[0], &table).unwrap();
    assert_eq!(merged.content["severity"], 5);
    assert_eq!(merged.content["updated_at"], 300);
    assert!(store.unresolved_conflicts().unwrap().is_empty());
}

#[test]
fn test_live_sync_backs_off_then_recovers() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let config = SyncConfig {
        poll_interval: Duration::from_millis(30),
        backoff: Backoff::new(Duration::from_millis(10), 2.0, Duration::from_millis(80)),
        ..Default::default()
    };
    let mut engine = seeded_engine(&[("obs-1", json!({"n": 1}))], &keys, config);
    // Five consecutive transport failures before the endpoint recovers
    engine.endpoint_mut().fail_next(5);

    let handle = engine.run_live();
    std::thread::sleep(Duration::from_millis(800));

    let stop_started = Instant::now();
    let engine = handle.stop();
    assert!(stop_started.elapsed() < Duration::from_secs(1));

    // Recovered: document on the remote, status synced
    assert!(engine.endpoint().remote_document("obs-1").is_some());
    assert_eq!(engine.status().unwrap().state, SyncStateKind::Synced);
}

#[test]
fn test_tombstone_replicates() {
    let keys = StaticKeyManager::new(SymmetricKey::generate());
    let audit = MemoryAuditSink::new();

    let storage = Storage::in_memory().unwrap();
    {
        let store = EncryptedStore::new(&storage, &keys, &audit).unwrap();
        let written = store.put(&Document::new("gone", json!({"n": 1}))).unwrap();
        store.delete("gone", written.revision.as_ref().unwrap()).unwrap();
    }

    let mut engine = SyncEngine::new(storage, MockEndpoint::new(), SyncConfig::default());
    let report = engine.push_once().unwrap();
    assert_eq!(report.pushed, 1);

    let remote = engine.endpoint().remote_document("gone").unwrap();
    assert!(remote.deleted);
    assert!(remote.ciphertext.is_empty());
}
