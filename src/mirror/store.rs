use super::record::MirrorRecord;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Persistence boundary for mirror records — an external collaborator, out
/// of scope for the proxy core to implement itself.
///
/// The core only needs list/get/health-update semantics; CRUD beyond that
/// belongs to the administrative layer this crate does not implement.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn list(&self) -> Vec<MirrorRecord>;
    async fn get(&self, id: &str) -> Option<MirrorRecord>;

    /// Write back the result of a health probe.
    async fn update_health(
        &self,
        id: &str,
        latency_ms: u32,
        last_check: DateTime<Utc>,
        enabled: bool,
    );
}

/// Default in-memory backing so the proxy core runs standalone without a
/// real persistence layer wired in. Keyed by record id; cheap to clone
/// (shares the underlying `DashMap`).
#[derive(Clone, Default)]
pub struct InMemoryMirrorStore {
    records: Arc<DashMap<String, MirrorRecord>>,
}

impl InMemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<MirrorRecord>) -> Self {
        let map = DashMap::new();
        for r in records {
            map.insert(r.id.clone(), r);
        }
        Self {
            records: Arc::new(map),
        }
    }

    pub fn insert(&self, record: MirrorRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirrorStore {
    async fn list(&self) -> Vec<MirrorRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    async fn get(&self, id: &str) -> Option<MirrorRecord> {
        self.records.get(id).map(|e| e.value().clone())
    }

    async fn update_health(
        &self,
        id: &str,
        latency_ms: u32,
        last_check: DateTime<Utc>,
        enabled: bool,
    ) {
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.latency_ms = latency_ms;
            entry.last_check = Some(last_check);
            entry.enabled = enabled;
        }
    }
}

/// Owns an explicit, read-mostly snapshot of the mirror list backed by a
/// `MirrorStore`. The health tracker atomically swaps the snapshot after
/// each sweep; the selector reads it lock-free and never touches the
/// store directly. This removes per-request store traffic and makes the
/// selector a pure function of the snapshot.
#[derive(Clone)]
pub struct MirrorRegistry {
    store: Arc<dyn MirrorStore>,
    snapshot: Arc<ArcSwap<Vec<MirrorRecord>>>,
}

impl MirrorRegistry {
    pub fn new(store: Arc<dyn MirrorStore>) -> Self {
        Self {
            store,
            snapshot: Arc::new(ArcSwap::new(Arc::new(Vec::new()))),
        }
    }

    /// Reload the snapshot from the backing store.
    pub async fn refresh(&self) {
        let records = self.store.list().await;
        self.snapshot.store(Arc::new(records));
    }

    /// Current read-only snapshot. Cheap (atomic load, no copy).
    pub fn snapshot(&self) -> Arc<Vec<MirrorRecord>> {
        self.snapshot.load_full()
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }
}
