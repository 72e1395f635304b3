//! Sync state store.
//!
//! Maps local issue IDs to remote identifiers for one service. Writes are
//! buffered as an append-only operation log and persisted in one batch by
//! [`SyncStateStore::flush`]; reads see buffered writes immediately.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{IssueStore, SyncData};

const KEY_NUMBER: &str = "number";
const KEY_REMOTE_ID: &str = "id";
const KEY_MILESTONE: &str = "milestone";
const KEY_REMOTE_KEY: &str = "key";
const KEY_SYNCED_AT: &str = "synced_at";

/// Remote identity of one local issue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRecord {
    /// Remote issue sequence number.
    pub number: Option<u64>,
    /// Remote internal id, when known.
    pub remote_id: Option<u64>,
    /// Remote milestone number (milestone-type issues).
    pub milestone: Option<u64>,
    /// Opaque remote key for services without numeric identifiers.
    pub remote_key: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// True when the record points at nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.number.is_none() && self.milestone.is_none() && self.remote_key.is_none()
    }

    /// Decode a stored extension map. Unknown or malformed keys are ignored.
    #[must_use]
    pub fn from_data(data: &SyncData) -> Self {
        Self {
            number: data.get(KEY_NUMBER).and_then(Value::as_u64),
            remote_id: data.get(KEY_REMOTE_ID).and_then(Value::as_u64),
            milestone: data.get(KEY_MILESTONE).and_then(Value::as_u64),
            remote_key: data
                .get(KEY_REMOTE_KEY)
                .and_then(Value::as_str)
                .map(String::from),
            synced_at: data
                .get(KEY_SYNCED_AT)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    #[must_use]
    pub fn to_data(&self) -> SyncData {
        let mut data = SyncData::new();
        if let Some(number) = self.number {
            data.insert(KEY_NUMBER.into(), number.into());
        }
        if let Some(id) = self.remote_id {
            data.insert(KEY_REMOTE_ID.into(), id.into());
        }
        if let Some(milestone) = self.milestone {
            data.insert(KEY_MILESTONE.into(), milestone.into());
        }
        if let Some(key) = &self.remote_key {
            data.insert(KEY_REMOTE_KEY.into(), key.clone().into());
        }
        if let Some(at) = self.synced_at {
            data.insert(KEY_SYNCED_AT.into(), at.to_rfc3339().into());
        }
        data
    }
}

#[derive(Debug, Clone)]
enum Op {
    Upsert(String, SyncRecord),
    Clear(String),
}

impl Op {
    fn id(&self) -> &str {
        match self {
            Self::Upsert(id, _) | Self::Clear(id) => id,
        }
    }
}

#[derive(Default)]
struct Buffer {
    log: Vec<Op>,
    /// Latest buffered value per ID; `None` means cleared.
    latest: HashMap<String, Option<SyncRecord>>,
}

/// Buffered per-service sync records.
///
/// Mutations of one key are linearizable: each mutator reads the current
/// value and appends the new one under the same write lock.
pub struct SyncStateStore {
    store: Arc<dyn IssueStore>,
    service: String,
    buffer: RwLock<Buffer>,
}

impl SyncStateStore {
    #[must_use]
    pub fn new(store: Arc<dyn IssueStore>, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
            buffer: RwLock::new(Buffer::default()),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    fn read(&self) -> RwLockReadGuard<'_, Buffer> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buffer> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, id: &str) -> Result<SyncRecord> {
        Ok(self
            .store
            .sync_data(id, &self.service)?
            .map(|data| SyncRecord::from_data(&data))
            .unwrap_or_default())
    }

    /// Current record for `id`; empty when never synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn get(&self, id: &str) -> Result<SyncRecord> {
        if let Some(buffered) = self.read().latest.get(id) {
            return Ok(buffered.clone().unwrap_or_default());
        }
        self.load(id)
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut SyncRecord)) -> Result<()> {
        let mut buffer = self.write();
        let mut record = match buffer.latest.get(id) {
            Some(buffered) => buffered.clone().unwrap_or_default(),
            None => self.load(id)?,
        };
        f(&mut record);
        buffer.latest.insert(id.to_string(), Some(record.clone()));
        buffer.log.push(Op::Upsert(id.to_string(), record));
        Ok(())
    }

    /// Record the remote issue number (and internal id, when known).
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn set(&self, id: &str, number: u64, remote_id: Option<u64>) -> Result<()> {
        self.modify(id, |record| {
            if record.number != Some(number) {
                record.remote_id = None;
            }
            record.number = Some(number);
            if remote_id.is_some() {
                record.remote_id = remote_id;
            }
        })
    }

    /// Record the remote milestone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn set_milestone(&self, id: &str, milestone: u64) -> Result<()> {
        self.modify(id, |record| record.milestone = Some(milestone))
    }

    /// Record an opaque remote key.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn set_remote_key(&self, id: &str, key: &str) -> Result<()> {
        self.modify(id, |record| record.remote_key = Some(key.to_string()))
    }

    /// # Errors
    ///
    /// Returns an error if the local store cannot be read.
    pub fn set_synced_at(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |record| record.synced_at = Some(at))
    }

    /// Forget the remote counterpart of `id`.
    pub fn clear(&self, id: &str) {
        let mut buffer = self.write();
        buffer.latest.insert(id.to_string(), None);
        buffer.log.push(Op::Clear(id.to_string()));
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.read().log.len()
    }

    /// Persist buffered operations, keeping only the last one per ID.
    ///
    /// Every surviving record is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first local-store error encountered.
    pub fn flush(&self) -> Result<usize> {
        let ops = {
            let mut buffer = self.write();
            buffer.latest.clear();
            std::mem::take(&mut buffer.log)
        };

        let mut last_index: HashMap<&str, usize> = HashMap::new();
        for (index, op) in ops.iter().enumerate() {
            last_index.insert(op.id(), index);
        }

        let mut first_error = None;
        let mut written = 0;
        for (index, op) in ops.iter().enumerate() {
            if last_index.get(op.id()) != Some(&index) {
                continue;
            }
            let outcome = match op {
                Op::Upsert(id, record) => {
                    self.store
                        .set_sync_data(id, &self.service, &record.to_data())
                }
                Op::Clear(id) => self.store.remove_sync_data(id, &self.service),
            };
            match outcome {
                Ok(()) => written += 1,
                Err(err) => {
                    warn!(id = op.id(), service = %self.service, error = %err, "failed to persist sync record");
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(service = %self.service, ops = ops.len(), written, "flushed sync state");
        match first_error {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }
}

/// Whether an issue changed after it was last synced.
///
/// Unknown timestamps on either side count as stale.
#[must_use]
pub fn is_stale(updated_at: Option<DateTime<Utc>>, synced_at: Option<DateTime<Utc>>) -> bool {
    match (updated_at, synced_at) {
        (Some(updated), Some(synced)) => updated > synced,
        _ => true,
    }
}
