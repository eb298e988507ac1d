//! In-Memory Event Store
//!
//! Process-local implementation of the store ports for tests and local
//! development. Each aggregate has its own exclusive lock; a transaction
//! keeps the locks it takes until it commits or is rolled back, and its
//! writes stay invisible to other transactions until commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::aggregate::Aggregate;

use super::{EventQuery, EventReceipt, EventStore, NewEvent, StoreError, StoreTransaction, StoredEvent};

#[derive(Debug, Clone)]
struct AggregateRow {
    aggregate_type: String,
    attributes: Map<String, Value>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AggregateRow {
    fn to_aggregate(&self, id: Uuid) -> Aggregate {
        Aggregate::from_row(
            self.aggregate_type.clone(),
            id,
            self.attributes.clone(),
            self.version,
            self.created_at,
            self.updated_at,
        )
    }
}

#[derive(Debug, Default)]
struct Tables {
    aggregates: HashMap<Uuid, AggregateRow>,
    events: Vec<StoredEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<Tables>,
    // Never held across an await; blocking so `Drop` can prune it.
    row_locks: SyncMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    event_sequence: AtomicI64,
}

impl Inner {
    fn row_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Forget the locks of `ids` that no transaction holds or waits for
    fn prune_row_locks(&self, ids: impl IntoIterator<Item = Uuid>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }

    fn row_lock_count(&self) -> usize {
        self.row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed events
    pub async fn event_count(&self) -> usize {
        self.inner.tables.read().await.events.len()
    }

    /// Number of committed aggregates
    pub async fn aggregate_count(&self) -> usize {
        self.inner.tables.read().await.aggregates.len()
    }

    /// Number of aggregate locks currently held or waited for
    pub fn active_lock_count(&self) -> usize {
        self.inner.row_lock_count()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        Ok(InMemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged: Staged::default(),
            savepoints: Vec::new(),
            locks: HashMap::new(),
        })
    }

    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .aggregates
            .get(&id)
            .filter(|row| row.aggregate_type == aggregate_type)
            .map(|row| row.to_aggregate(id)))
    }

    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let tables = self.inner.tables.read().await;
        let mut events: Vec<StoredEvent> = tables
            .events
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.id.cmp(&a.id));
        events.truncate(usize::try_from(query.limit).unwrap_or(0));
        Ok(events)
    }
}

/// Uncommitted writes of one transaction
#[derive(Debug, Clone, Default)]
struct Staged {
    aggregates: HashMap<Uuid, AggregateRow>,
    events: Vec<StoredEvent>,
}

/// Transaction over an [`InMemoryEventStore`]
#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    staged: Staged,
    savepoints: Vec<Staged>,
    locks: HashMap<Uuid, OwnedMutexGuard<()>>,
}

impl InMemoryTransaction {
    /// Row as seen by this transaction: own writes first, then committed
    async fn visible_row(&self, id: Uuid) -> Option<AggregateRow> {
        if let Some(row) = self.staged.aggregates.get(&id) {
            return Some(row.clone());
        }
        self.inner.tables.read().await.aggregates.get(&id).cloned()
    }

    async fn acquire(&mut self, id: Uuid) {
        if self.locks.contains_key(&id) {
            return;
        }
        let lock = self.inner.row_lock(id);
        tracing::trace!("Waiting for row lock on aggregate {}", id);
        let guard = lock.lock_owned().await;
        self.locks.insert(id, guard);
    }

    fn release_locks(&mut self) {
        if self.locks.is_empty() {
            return;
        }
        let ids: Vec<Uuid> = self.locks.keys().copied().collect();
        self.locks.clear();
        self.inner.prune_row_locks(ids);
    }

    fn not_found(aggregate_type: &str, id: Uuid) -> StoreError {
        StoreError::AggregateNotFound {
            aggregate_type: aggregate_type.to_string(),
            id,
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_aggregate(
        &mut self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError> {
        Ok(self
            .visible_row(id)
            .await
            .filter(|row| row.aggregate_type == aggregate_type)
            .map(|row| row.to_aggregate(id)))
    }

    async fn lock_aggregate(
        &mut self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Aggregate, StoreError> {
        self.acquire(id).await;

        self.visible_row(id)
            .await
            .filter(|row| row.aggregate_type == aggregate_type)
            .map(|row| row.to_aggregate(id))
            .ok_or_else(|| Self::not_found(aggregate_type, id))
    }

    async fn save_aggregate(&mut self, aggregate: &mut Aggregate) -> Result<(), StoreError> {
        let now = Utc::now();

        let (id, row) = match aggregate.id() {
            None => {
                let id = Uuid::new_v4();
                // A freshly inserted row belongs to its inserting transaction.
                self.acquire(id).await;
                let row = AggregateRow {
                    aggregate_type: aggregate.aggregate_type().to_string(),
                    attributes: aggregate.attributes().clone(),
                    version: 1,
                    created_at: now,
                    updated_at: now,
                };
                (id, row)
            }
            Some(id) => {
                self.acquire(id).await;
                let current = self
                    .visible_row(id)
                    .await
                    .filter(|row| row.aggregate_type == aggregate.aggregate_type())
                    .ok_or_else(|| Self::not_found(aggregate.aggregate_type(), id))?;
                let row = AggregateRow {
                    attributes: aggregate.attributes().clone(),
                    version: current.version + 1,
                    updated_at: now,
                    ..current
                };
                (id, row)
            }
        };

        aggregate.mark_saved(id, row.version, now);
        self.staged.aggregates.insert(id, row);
        Ok(())
    }

    async fn insert_event(&mut self, event: &NewEvent) -> Result<EventReceipt, StoreError> {
        // Like a database sequence, ids are consumed even if the transaction
        // later rolls back.
        let id = self.inner.event_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let created_at = Utc::now();

        self.staged.events.push(StoredEvent {
            id,
            event_type: event.event_type.clone(),
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            data: event.data.clone(),
            metadata: event.metadata.clone(),
            actor_id: event.actor_id,
            created_at,
        });

        Ok(EventReceipt { id, created_at })
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.staged.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no savepoint to release".to_string()))
    }

    async fn rollback_savepoint(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .savepoints
            .pop()
            .ok_or_else(|| StoreError::Transaction("no savepoint to roll back".to_string()))?;
        self.staged = snapshot;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.inner.tables.write().await;
        tables.aggregates.extend(staged.aggregates);
        tables.events.extend(staged.events);
        drop(tables);
        self.release_locks();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release_locks();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_locks();
    }
}
