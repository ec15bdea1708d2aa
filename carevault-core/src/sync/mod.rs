// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Replication of encrypted documents against a remote endpoint.

pub mod backoff;
pub mod endpoint;
pub mod engine;

pub use backoff::Backoff;
pub use endpoint::{
    MockEndpoint, PullBatch, PushOutcome, PushStatus, RemoteDocument, ReplicationEndpoint,
    TransportError,
};
pub use engine::{
    ConflictHandler, LiveSyncHandle, PriorityFn, ReadyFn, SyncConfig, SyncEngine, SyncError,
    SyncReport, WithheldDocument,
};
