//! Event Record
//!
//! One state transition of one aggregate. Applying an event resolves (or
//! creates) its aggregate, locks it, runs the registered aggregator, saves
//! the aggregate and inserts the event, all inside the caller's transaction.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{OperationContext, PayloadSchema};
use crate::error::{Error, Result};
use crate::event_store::{NewEvent, StoreError, StoreTransaction, StoredEvent};
use crate::registry::{ConfigurationError, Registry};

/// Lifecycle position of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Built in memory, nothing touched in the store
    Draft,
    /// Aggregate loaded, or built empty when the event creates it
    AggregateResolved,
    /// Existing aggregate row locked for the rest of the transaction
    Locked,
    /// New aggregate; nothing to lock yet
    Unlocked,
    /// Aggregator ran
    Applied,
    /// Aggregate saved and event row inserted
    Persisted,
}

/// Event record
#[derive(Debug, Clone)]
pub struct Event {
    id: Option<i64>,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Option<Uuid>,
    payload: Map<String, Value>,
    actor_id: Option<Uuid>,
    metadata: OperationContext,
    created_at: Option<DateTime<Utc>>,
    state: EventState,
    aggregate: Option<Aggregate>,
    // Known for events built from the registry; loaded events are immutable.
    schema: Option<Arc<PayloadSchema>>,
}

impl Event {
    /// Build a draft event.
    ///
    /// Fails when the event type has no registered definition or the payload
    /// carries a field its schema does not declare.
    pub fn new(
        registry: &Registry,
        event_type: impl Into<String>,
        payload: Map<String, Value>,
    ) -> std::result::Result<Self, ConfigurationError> {
        let event_type = event_type.into();
        let definition = registry.definition(&event_type)?;

        if let Some(field) = definition.schema().undeclared_field(&payload) {
            return Err(ConfigurationError::UndeclaredField {
                event_type,
                field: field.to_string(),
            });
        }

        Ok(Self {
            id: None,
            aggregate_type: definition.aggregate_type().to_string(),
            event_type,
            aggregate_id: None,
            payload,
            actor_id: None,
            metadata: OperationContext::default(),
            created_at: None,
            state: EventState::Draft,
            aggregate: None,
            schema: Some(definition.shared_schema()),
        })
    }

    /// Rebuild a persisted event from its stored row
    pub fn from_stored(stored: StoredEvent) -> Result<Self> {
        let payload = match stored.data {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::InvalidData(format!(
                    "data of event {} must be an object, got {}",
                    stored.id, other
                ))
                .into())
            }
        };
        let metadata: OperationContext =
            serde_json::from_value(stored.metadata).map_err(StoreError::from)?;

        Ok(Self {
            id: Some(stored.id),
            event_type: stored.event_type,
            aggregate_type: stored.aggregate_type,
            aggregate_id: stored.aggregate_id,
            payload,
            actor_id: stored.actor_id,
            metadata,
            created_at: Some(stored.created_at),
            state: EventState::Persisted,
            aggregate: None,
            schema: None,
        })
    }

    /// Target an existing aggregate
    pub fn with_aggregate_id(mut self, aggregate_id: Uuid) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    pub fn with_actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn with_metadata(mut self, metadata: OperationContext) -> Self {
        self.metadata = metadata;
        self
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Underscored name, e.g. `post/title_changed`
    pub fn event_name(&self) -> String {
        super::event_name(&self.event_type)
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> Option<Uuid> {
        self.aggregate_id
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Payload value of a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.actor_id
    }

    pub fn metadata(&self) -> &OperationContext {
        &self.metadata
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn is_persisted(&self) -> bool {
        self.state == EventState::Persisted
    }

    /// Aggregate the event was applied to, once resolved
    pub fn aggregate(&self) -> Option<&Aggregate> {
        self.aggregate.as_ref()
    }

    // =========================================================================
    // Mutation (drafts only)
    // =========================================================================

    /// Set a payload field. Only drafts can change, and only fields the
    /// event type declares.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.ensure_state(EventState::Draft)?;
        let field = field.into();
        if let Some(schema) = &self.schema {
            if !schema.contains(&field) {
                return Err(ConfigurationError::UndeclaredField {
                    event_type: self.event_type.clone(),
                    field,
                }
                .into());
            }
        }
        self.payload.insert(field, value.into());
        Ok(())
    }

    /// Point a draft at the aggregate a previous event of the same batch
    /// created
    pub(crate) fn adopt_aggregate_id(&mut self, aggregate_id: Uuid) {
        if self.state == EventState::Draft && self.aggregate_id.is_none() {
            self.aggregate_id = Some(aggregate_id);
        }
    }

    /// Validate the payload against the registered schema
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        let definition = registry.definition(&self.event_type)?;
        definition.schema().validate(&self.payload)?;
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Apply the event to its aggregate and persist both inside `tx`.
    ///
    /// On failure the event returns to `Draft` with its original aggregate
    /// reference; the caller is expected to roll `tx` back.
    pub async fn apply_and_persist<T>(&mut self, tx: &mut T, registry: &Registry) -> Result<()>
    where
        T: StoreTransaction + ?Sized,
    {
        self.ensure_state(EventState::Draft)?;
        let original_aggregate_id = self.aggregate_id;

        let result = self.run_lifecycle(tx, registry).await;
        if result.is_err() {
            tracing::debug!(
                "Event {} failed in state {:?}, reverting to draft",
                self.event_type,
                self.state
            );
            self.revert_to_draft(original_aggregate_id);
        }
        result
    }

    /// Forget everything the lifecycle assigned, after the transaction that
    /// ran it was rolled back
    pub(crate) fn revert_to_draft(&mut self, original_aggregate_id: Option<Uuid>) {
        self.state = EventState::Draft;
        self.aggregate = None;
        self.aggregate_id = original_aggregate_id;
        self.id = None;
        self.created_at = None;
    }

    async fn run_lifecycle<T>(&mut self, tx: &mut T, registry: &Registry) -> Result<()>
    where
        T: StoreTransaction + ?Sized,
    {
        let definition = registry.definition(&self.event_type)?;
        let binding = registry.binding(definition.aggregate_type()).ok_or_else(|| {
            ConfigurationError::UnboundAggregate {
                event_type: self.event_type.clone(),
                aggregate_type: definition.aggregate_type().to_string(),
            }
        })?;

        self.validate(registry)?;

        // Resolve: an event without a reference creates its aggregate.
        let mut aggregate = match self.aggregate_id {
            None => Aggregate::new(binding.aggregate_type()),
            Some(id) => tx
                .find_aggregate(binding.aggregate_type(), id)
                .await?
                .ok_or_else(|| StoreError::AggregateNotFound {
                    aggregate_type: binding.aggregate_type().to_string(),
                    id,
                })?,
        };
        self.state = EventState::AggregateResolved;

        // Lock: the locked read replaces the unlocked one, so a writer that
        // waited here sees the state left by the previous lock holder.
        if let Some(id) = aggregate.id() {
            aggregate = tx.lock_aggregate(binding.aggregate_type(), id).await?;
            self.state = EventState::Locked;
        } else {
            self.state = EventState::Unlocked;
        }
        tracing::debug!(
            "Event {} resolved {} aggregate {:?} ({:?})",
            self.event_type,
            aggregate.aggregate_type(),
            aggregate.id(),
            self.state
        );

        definition.aggregator().apply(&mut aggregate, self)?;
        self.state = EventState::Applied;

        binding.validate(&aggregate)?;

        tx.save_aggregate(&mut aggregate).await?;
        if self.aggregate_id.is_none() {
            self.aggregate_id = aggregate.id();
        }

        let receipt = tx.insert_event(&self.to_new_event()?).await?;
        self.id = Some(receipt.id);
        self.created_at = Some(receipt.created_at);
        self.aggregate = Some(aggregate);
        self.state = EventState::Persisted;

        tracing::debug!(
            "Event {} #{} persisted for aggregate {:?}",
            self.event_type,
            receipt.id,
            self.aggregate_id
        );

        Ok(())
    }

    fn to_new_event(&self) -> Result<NewEvent> {
        Ok(NewEvent {
            event_type: self.event_type.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id,
            data: Value::Object(self.payload.clone()),
            metadata: self.metadata.to_json().map_err(StoreError::from)?,
            actor_id: self.actor_id,
        })
    }

    fn ensure_state(&self, expected: EventState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}
