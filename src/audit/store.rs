//! Bounded, persisted audit log.
//!
//! Entries are appended in memory first, so they are visible to queries as
//! soon as `add_log` returns, then the whole buffer is written to the
//! key-value store. Persistence failures are logged and never surface to the
//! caller: an unavailable disk must not break authentication.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::entry::{AuditEvent, AuditKind, AuditLogEntry, unix_millis};
use crate::network::NetworkErrorKind;
use crate::storage::{KeyValueStore, StorageError, keys};

/// Default buffer capacity.
pub const MAX_ENTRIES: usize = 100;

/// Aggregate counters over the current buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub errors: usize,
    pub retries: usize,
    pub auths: usize,
    pub successful_auths: usize,
    /// Mean of `duration_ms` over entries that carry one.
    pub average_response_time_ms: Option<f64>,
    pub error_kinds: BTreeMap<NetworkErrorKind, usize>,
}

#[derive(Serialize)]
struct AuditExport<'a> {
    exported_at_ms: u64,
    capacity: usize,
    entries: &'a [AuditLogEntry],
}

/// FIFO audit buffer bounded at `capacity` entries.
pub struct AuditLogStore {
    entries: Mutex<VecDeque<AuditLogEntry>>,
    next_id: AtomicU64,
    capacity: usize,
    backend: Option<Arc<dyn KeyValueStore>>,
    // Serializes snapshot+write so an older buffer never overwrites a newer one.
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for AuditLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("persistent", &self.backend.is_some())
            .finish()
    }
}

impl AuditLogStore {
    /// A store that only lives in memory.
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            backend: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Restores the buffer from `backend` and persists every change back to it.
    ///
    /// A corrupt stored buffer is discarded with a warning rather than
    /// failing startup.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    #[instrument(skip(backend))]
    pub async fn load(
        backend: Arc<dyn KeyValueStore>,
        capacity: usize,
    ) -> Result<Self, StorageError> {
        let mut store = Self::in_memory(capacity);

        if let Some(raw) = backend.get(keys::AUDIT_LOG).await? {
            match serde_json::from_str::<Vec<AuditLogEntry>>(&raw) {
                Ok(mut restored) => {
                    let overflow = restored.len().saturating_sub(store.capacity);
                    restored.drain(..overflow);
                    let next_id = restored.iter().map(|entry| entry.id).max().unwrap_or(0) + 1;
                    store.next_id = AtomicU64::new(next_id);
                    debug!(entries = restored.len(), "restored audit log");
                    store.entries = Mutex::new(restored.into());
                }
                Err(error) => {
                    warn!(error = %error, "discarding unreadable persisted audit log");
                }
            }
        }

        store.backend = Some(backend);
        Ok(store)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assigns id and timestamp, appends, evicts the oldest beyond capacity,
    /// then persists. Returns the stored entry.
    pub async fn add_log(&self, event: AuditEvent) -> AuditLogEntry {
        let entry = AuditLogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: unix_millis(SystemTime::now()),
            event,
        };

        {
            let mut entries = self.lock_entries();
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        self.persist().await;
        entry
    }

    /// Every entry, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<AuditLogEntry> {
        self.lock_entries().iter().cloned().collect()
    }

    #[must_use]
    pub fn get_logs_by_type(&self, kind: AuditKind) -> Vec<AuditLogEntry> {
        self.filter(|entry| entry.event.kind() == kind)
    }

    #[must_use]
    pub fn get_logs_by_error_kind(&self, kind: NetworkErrorKind) -> Vec<AuditLogEntry> {
        self.filter(|entry| entry.event.error_kind() == Some(kind))
    }

    /// All entries of one logical call, in emission order.
    #[must_use]
    pub fn get_logs_by_request_id(&self, request_id: &str) -> Vec<AuditLogEntry> {
        self.filter(|entry| entry.event.request_id() == Some(request_id))
    }

    /// Entries with `from <= timestamp <= to`.
    #[must_use]
    pub fn get_logs_in_range(&self, from: SystemTime, to: SystemTime) -> Vec<AuditLogEntry> {
        let (from, to) = (unix_millis(from), unix_millis(to));
        self.filter(|entry| (from..=to).contains(&entry.timestamp_ms))
    }

    /// The last `count` entries, oldest first.
    #[must_use]
    pub fn get_recent_logs(&self, count: usize) -> Vec<AuditLogEntry> {
        let entries = self.lock_entries();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn get_stats(&self) -> AuditStats {
        let entries = self.lock_entries();
        let mut stats = AuditStats {
            total: entries.len(),
            ..AuditStats::default()
        };
        let mut duration_sum: u128 = 0;
        let mut duration_count: u32 = 0;

        for entry in entries.iter() {
            match &entry.event {
                AuditEvent::Error { kind, .. } => {
                    stats.errors += 1;
                    *stats.error_kinds.entry(*kind).or_insert(0) += 1;
                }
                AuditEvent::Retry { .. } => stats.retries += 1,
                AuditEvent::Auth { success, .. } => {
                    stats.auths += 1;
                    if *success {
                        stats.successful_auths += 1;
                    }
                }
                AuditEvent::Request { .. } | AuditEvent::Response { .. } => {}
            }
            if let Some(duration) = entry.event.duration_ms() {
                duration_sum += u128::from(duration);
                duration_count += 1;
            }
        }

        if duration_count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let average = duration_sum as f64 / f64::from(duration_count);
            stats.average_response_time_ms = Some(average);
        }

        stats
    }

    /// Serializes the whole buffer as pretty JSON for offline diagnostics.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; in practice entries always serialize.
    pub fn export(&self) -> Result<String, serde_json::Error> {
        let entries = self.all();
        serde_json::to_string_pretty(&AuditExport {
            exported_at_ms: unix_millis(SystemTime::now()),
            capacity: self.capacity,
            entries: &entries,
        })
    }

    /// Empties the buffer and persists the empty state.
    pub async fn clear(&self) {
        self.lock_entries().clear();
        self.persist().await;
    }

    fn filter(&self, predicate: impl Fn(&AuditLogEntry) -> bool) -> Vec<AuditLogEntry> {
        self.lock_entries()
            .iter()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self) {
        let Some(backend) = &self.backend else {
            return;
        };

        let _guard = self.persist_lock.lock().await;
        let serialized = {
            let entries = self.lock_entries();
            serde_json::to_string(&*entries)
        };

        let result = match serialized {
            Ok(json) => backend.set(keys::AUDIT_LOG, &json).await,
            Err(error) => Err(StorageError::invalid_value(keys::AUDIT_LOG, error)),
        };
        if let Err(error) = result {
            warn!(error = %error, "failed to persist audit log");
        }
    }
}
