//! Registry: the tracker's authoritative inventory and key-mapping store.
//!
//! Trait-based so the transactional backing store stays swappable; the
//! SQLite implementation is the default backend.

pub mod sqlite;

use crate::error::Result;
use crate::model::{Device, FileInfo, Host, PendingFile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteRegistry;

/// Outcome of the atomic commit swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The key now maps to the new fid. The previously mapped fid, if any,
    /// is returned for orphaning; it is never revived.
    Committed { replaced: Option<i64> },
    /// Retried commit for a (key, fid) pair that already holds the mapping.
    AlreadyCommitted,
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_hosts(&self) -> Result<Vec<Host>>;

    async fn get_devices(&self) -> Result<Vec<Device>>;

    async fn get_device(&self, devid: i64) -> Result<Option<Device>>;

    /// Insert or refresh a host record (registration/heartbeat path).
    async fn upsert_host(&self, host: &Host) -> Result<()>;

    /// Insert or refresh a device record (usage report path). Rejects
    /// reports where both counters are present and used exceeds total.
    async fn upsert_device(&self, device: &Device) -> Result<()>;

    /// Allocate a fresh pending-file identifier bound to a device.
    async fn create_pending_file(&self, devid: i64) -> Result<i64>;

    async fn get_pending_file(&self, fid: i64) -> Result<Option<PendingFile>>;

    /// Atomically promote a pending file to committed and swap the key
    /// mapping to it. Validates that the pending file exists and belongs to
    /// the given device; a replay of an identical, already-committed pair is
    /// a no-op outcome rather than an error.
    async fn commit_file(
        &self,
        key: &str,
        fid: i64,
        devid: i64,
        size: i64,
    ) -> Result<CommitOutcome>;

    /// Current committed file for a key; `None` if absent or tombstoned.
    async fn get_key_mapping(&self, key: &str) -> Result<Option<FileInfo>>;

    /// Mark the key mapping deleted without touching bytes. Returns whether
    /// a live mapping existed.
    async fn tombstone_key(&self, key: &str) -> Result<bool>;

    /// Pending files created before the cutoff.
    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<PendingFile>>;

    /// Committed files no longer reachable through a live key mapping:
    /// superseded by a newer commit, orphaned by a lost race, or tombstoned.
    async fn list_reclaimable_files(&self) -> Result<Vec<FileInfo>>;

    async fn remove_pending_file(&self, fid: i64) -> Result<()>;

    async fn remove_file(&self, fid: i64) -> Result<()>;

    /// Drop tombstoned key rows whose file is already reclaimed. Returns the
    /// number of rows purged.
    async fn purge_tombstones(&self) -> Result<u64>;
}

/// Type alias for dynamic registry
pub type DynRegistry = dyn Registry;
