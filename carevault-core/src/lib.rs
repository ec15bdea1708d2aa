//! Carevault Core Library
//!
//! Offline-first encrypted document store for sensitive records, with
//! bidirectional sync, deterministic per-field conflict resolution, key
//! lifecycle management and device key exchange. All cryptographic
//! operations use the audited `ring` crate plus XChaCha20-Poly1305.

pub mod audit;
pub mod crypto;
pub mod exchange;
pub mod keys;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod sync;

pub use audit::{
    AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity, AuditSink, MemoryAuditSink,
    NullAuditSink,
};
pub use crypto::{
    decrypt, encrypt, unwrap_key, wrap_key, EncryptionError, ExchangeKeyPair, SymmetricKey,
    WrapError,
};
pub use exchange::{DeviceRegistry, ExchangeError, KeyTransfer};
pub use keys::{
    BackupManager, FileKeyStorage, KeyError, KeyLifecycle, KeyManager, MigrationReport,
    RotationPolicy, SecureStorage, StaticKeyManager, StoredKeyManager,
};
pub use resolver::{resolve, MergeDecision, MergeOutcome, MergeStrategy, StrategyTable};
pub use storage::{
    ConflictRecord, CorruptedDocument, KeyBackup, KeyTransferRequest, KeyVersion, PairedDevice,
    RawDocument, RemoteApply, ResolutionKind, Revision, RotatedBy, Storage, StorageError,
    SyncStateKind, SyncStatus,
};
pub use store::{Document, EncryptedStore, StoreError};
pub use sync::{
    Backoff, LiveSyncHandle, MockEndpoint, PullBatch, PushOutcome, PushStatus, RemoteDocument,
    ReplicationEndpoint, SyncConfig, SyncEngine, SyncError, SyncReport, TransportError,
    WithheldDocument,
};
