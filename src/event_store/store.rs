//! Store Ports
//!
//! What the event lifecycle needs from the relational store: transactions,
//! savepoints, pessimistic row locks on aggregates, aggregate saves and
//! event inserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;

use super::StoreError;

/// Default page size for event listings
pub const DEFAULT_EVENT_LIMIT: i64 = 50;

/// Stored event from the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Event row ready to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub actor_id: Option<Uuid>,
}

/// Identity assigned to an inserted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReceipt {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing events, most recent first (id descending)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub aggregate_id: Option<Uuid>,
    pub event_type: Option<String>,
    pub limit: i64,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            aggregate_id: None,
            event_type: None,
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

impl EventQuery {
    /// All events, most recent first
    pub fn recent_first() -> Self {
        Self::default()
    }

    pub fn for_aggregate(mut self, aggregate_id: Uuid) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.max(0);
        self
    }

    /// Check if a stored event passes the filter (limit excluded)
    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.aggregate_id.map_or(true, |id| event.aggregate_id == Some(id))
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
    }
}

/// One open store transaction.
///
/// Dropping a transaction without calling `commit` rolls it back and
/// releases every row lock it holds.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read an aggregate as visible to this transaction, without locking
    async fn find_aggregate(
        &mut self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError>;

    /// Take the exclusive row lock on an aggregate and return its latest
    /// committed state. Blocks while another transaction holds the lock.
    async fn lock_aggregate(&mut self, aggregate_type: &str, id: Uuid)
        -> Result<Aggregate, StoreError>;

    /// Insert (no id yet) or update the aggregate. Assigns the id on first
    /// save and updates version and timestamps.
    async fn save_aggregate(&mut self, aggregate: &mut Aggregate) -> Result<(), StoreError>;

    /// Insert an event row
    async fn insert_event(&mut self, event: &NewEvent) -> Result<EventReceipt, StoreError>;

    /// Open a nested savepoint
    async fn savepoint(&mut self) -> Result<(), StoreError>;

    /// Keep the work done since the innermost savepoint
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;

    /// Undo the work done since the innermost savepoint and discard it
    async fn rollback_savepoint(&mut self) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Transactional store of aggregates and events
#[async_trait]
pub trait EventStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Start a transaction
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Read a committed aggregate
    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError>;

    /// List committed events, most recent first
    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError>;
}
