// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Audit Sink
//!
//! External collaborator seam for the audit trail. Every encrypt, decrypt,
//! conflict resolution, key rotation and key transfer emits exactly one
//! event. Recording is fire-and-forget: a failing sink must never fail the
//! operation that produced the event, so `record` does not return a Result.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    Encrypt,
    Decrypt,
    ConflictResolution,
    KeyRotation,
    KeyTransfer,
}

impl AuditEventKind {
    /// Returns a string representation suitable for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Encrypt => "encrypt",
            AuditEventKind::Decrypt => "decrypt",
            AuditEventKind::ConflictResolution => "conflict_resolution",
            AuditEventKind::KeyRotation => "key_rotation",
            AuditEventKind::KeyTransfer => "key_transfer",
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// Whether the audited operation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One immutable audit event.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub severity: AuditSeverity,
    /// Component that produced the event (e.g. "store", "key_lifecycle").
    pub source: &'static str,
    /// Free-form detail, e.g. document id or changed field list.
    pub details: String,
    pub outcome: AuditOutcome,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl AuditEvent {
    /// Creates an event timestamped now.
    pub fn new(
        kind: AuditEventKind,
        severity: AuditSeverity,
        source: &'static str,
        details: String,
        outcome: AuditOutcome,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        AuditEvent {
            kind,
            severity,
            source,
            details,
            outcome,
            timestamp,
        }
    }
}

/// Sink for audit events.
///
/// Implementations must be cheap and infallible from the caller's point of
/// view; buffering and delivery failures are the sink's own problem.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: AuditEvent);
}

/// Sink that discards all events.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// In-memory sink capturing events for assertions in tests.
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        MemoryAuditSink {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Counts recorded events of the given kind.
    pub fn count_of(&self, kind: AuditEventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_events() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(
            AuditEventKind::Encrypt,
            AuditSeverity::Info,
            "store",
            "doc-1".into(),
            AuditOutcome::Success,
        ));
        sink.record(AuditEvent::new(
            AuditEventKind::Decrypt,
            AuditSeverity::Warning,
            "store",
            "doc-2".into(),
            AuditOutcome::Failure,
        ));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count_of(AuditEventKind::Encrypt), 1);
        assert_eq!(sink.count_of(AuditEventKind::Decrypt), 1);
    }

    #[test]
    fn test_event_kind_strings() {
        assert_eq!(AuditEventKind::KeyRotation.as_str(), "key_rotation");
        assert_eq!(
            AuditEventKind::ConflictResolution.as_str(),
            "conflict_resolution"
        );
    }
}
