//! PostgreSQL Event Store
//!
//! Store ports backed by PostgreSQL. Aggregates are locked with
//! `SELECT ... FOR UPDATE`; per-event isolation inside a batch uses
//! savepoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::config::Config;

use super::{EventQuery, EventReceipt, EventStore, NewEvent, StoreError, StoreTransaction, StoredEvent};

type AggregateRowTuple = (Uuid, String, Value, i64, DateTime<Utc>, DateTime<Utc>);

type EventRowTuple = (
    i64,
    String,
    String,
    Option<Uuid>,
    Value,
    Value,
    Option<Uuid>,
    DateTime<Utc>,
);

fn aggregate_from_row(row: AggregateRowTuple) -> Result<Aggregate, StoreError> {
    let (id, aggregate_type, attributes, version, created_at, updated_at) = row;
    let attributes = match attributes {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(StoreError::InvalidData(format!(
                "attributes of aggregate {} must be an object, got {}",
                id, other
            )))
        }
    };
    Ok(Aggregate::from_row(
        aggregate_type,
        id,
        attributes,
        version,
        created_at,
        updated_at,
    ))
}

fn event_from_row(row: EventRowTuple) -> StoredEvent {
    let (id, event_type, aggregate_type, aggregate_id, data, metadata, actor_id, created_at) = row;
    StoredEvent {
        id,
        event_type,
        aggregate_type,
        aggregate_id,
        data,
        metadata,
        actor_id,
        created_at,
    }
}

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgEventStore {
    /// Create a new store with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Connect using the application configuration
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        let mut store = Self::new(pool);
        if let Some(timeout) = config.lock_timeout {
            store = store.with_lock_timeout(timeout);
        }
        Ok(store)
    }

    /// Bound how long a transaction waits for a row lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    type Transaction = PgStoreTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters; the value is an integer.
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(PgStoreTransaction {
            tx,
            savepoint_depth: 0,
        })
    }

    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError> {
        let row: Option<AggregateRowTuple> = sqlx::query_as(
            r#"
            SELECT id, aggregate_type, attributes, version, created_at, updated_at
            FROM aggregates
            WHERE id = $1 AND aggregate_type = $2
            "#,
        )
        .bind(id)
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(aggregate_from_row).transpose()
    }

    async fn recent_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<EventRowTuple> = sqlx::query_as(
            r#"
            SELECT id, event_type, aggregate_type, aggregate_id, data, metadata, actor_id, created_at
            FROM events
            WHERE ($1::uuid IS NULL OR aggregate_id = $1)
              AND ($2::text IS NULL OR event_type = $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(query.aggregate_id)
        .bind(query.event_type.as_deref())
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(event_from_row).collect())
    }
}

/// Open PostgreSQL transaction
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    savepoint_depth: u32,
}

impl std::fmt::Debug for PgStoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStoreTransaction")
            .field("savepoint_depth", &self.savepoint_depth)
            .finish_non_exhaustive()
    }
}

impl PgStoreTransaction {
    fn savepoint_name(depth: u32) -> String {
        format!("event_src_sp_{}", depth)
    }

    fn lock_error(error: sqlx::Error, id: Uuid) -> StoreError {
        let store_error = StoreError::Database(error);
        if store_error.is_lock_timeout() {
            StoreError::LockTimeout(id)
        } else {
            store_error
        }
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn find_aggregate(
        &mut self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Option<Aggregate>, StoreError> {
        let row: Option<AggregateRowTuple> = sqlx::query_as(
            r#"
            SELECT id, aggregate_type, attributes, version, created_at, updated_at
            FROM aggregates
            WHERE id = $1 AND aggregate_type = $2
            "#,
        )
        .bind(id)
        .bind(aggregate_type)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(aggregate_from_row).transpose()
    }

    async fn lock_aggregate(
        &mut self,
        aggregate_type: &str,
        id: Uuid,
    ) -> Result<Aggregate, StoreError> {
        let row: Option<AggregateRowTuple> = sqlx::query_as(
            r#"
            SELECT id, aggregate_type, attributes, version, created_at, updated_at
            FROM aggregates
            WHERE id = $1 AND aggregate_type = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(aggregate_type)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| Self::lock_error(e, id))?;

        match row {
            Some(row) => aggregate_from_row(row),
            None => Err(StoreError::AggregateNotFound {
                aggregate_type: aggregate_type.to_string(),
                id,
            }),
        }
    }

    async fn save_aggregate(&mut self, aggregate: &mut Aggregate) -> Result<(), StoreError> {
        let attributes = Value::Object(aggregate.attributes().clone());

        let saved: Option<(Uuid, i64, DateTime<Utc>)> = match aggregate.id() {
            None => {
                sqlx::query_as(
                    r#"
                    INSERT INTO aggregates (id, aggregate_type, attributes, version)
                    VALUES ($1, $2, $3, 1)
                    RETURNING id, version, updated_at
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(aggregate.aggregate_type())
                .bind(&attributes)
                .fetch_optional(&mut *self.tx)
                .await?
            }
            Some(id) => {
                sqlx::query_as(
                    r#"
                    UPDATE aggregates
                    SET attributes = $3, version = version + 1, updated_at = NOW()
                    WHERE id = $1 AND aggregate_type = $2
                    RETURNING id, version, updated_at
                    "#,
                )
                .bind(id)
                .bind(aggregate.aggregate_type())
                .bind(&attributes)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| Self::lock_error(e, id))?
            }
        };

        match saved {
            Some((id, version, saved_at)) => {
                aggregate.mark_saved(id, version, saved_at);
                Ok(())
            }
            None => Err(StoreError::AggregateNotFound {
                aggregate_type: aggregate.aggregate_type().to_string(),
                id: aggregate.id().unwrap_or_default(),
            }),
        }
    }

    async fn insert_event(&mut self, event: &NewEvent) -> Result<EventReceipt, StoreError> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO events (
                event_type, aggregate_type, aggregate_id,
                data, metadata, actor_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, created_at
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.data)
        .bind(&event.metadata)
        .bind(event.actor_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(EventReceipt { id, created_at })
    }

    async fn savepoint(&mut self) -> Result<(), StoreError> {
        let depth = self.savepoint_depth + 1;
        let statement = format!("SAVEPOINT {}", Self::savepoint_name(depth));
        sqlx::query(&statement).execute(&mut *self.tx).await?;
        self.savepoint_depth = depth;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoint_depth == 0 {
            return Err(StoreError::Transaction("no savepoint to release".to_string()));
        }
        let statement = format!(
            "RELEASE SAVEPOINT {}",
            Self::savepoint_name(self.savepoint_depth)
        );
        sqlx::query(&statement).execute(&mut *self.tx).await?;
        self.savepoint_depth -= 1;
        Ok(())
    }

    async fn rollback_savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoint_depth == 0 {
            return Err(StoreError::Transaction("no savepoint to roll back".to_string()));
        }
        let name = Self::savepoint_name(self.savepoint_depth);
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await?;
        self.savepoint_depth -= 1;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// =========================================================================
// Tests (integration tests against PostgreSQL live in tests/)
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_from_row() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let aggregate =
            aggregate_from_row((id, "Post".to_string(), json!({"title": "A"}), 3, now, now))
                .unwrap();

        assert_eq!(aggregate.id(), Some(id));
        assert_eq!(aggregate.version(), 3);
        assert_eq!(aggregate.get_str("title"), Some("A"));
    }

    #[test]
    fn test_aggregate_from_row_rejects_non_object() {
        let now = Utc::now();
        let err = aggregate_from_row((Uuid::new_v4(), "Post".to_string(), json!([1]), 1, now, now))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn test_savepoint_names_are_nested() {
        assert_eq!(PgStoreTransaction::savepoint_name(1), "event_src_sp_1");
        assert_ne!(
            PgStoreTransaction::savepoint_name(1),
            PgStoreTransaction::savepoint_name(2)
        );
    }
}
