//! Field-Based Command
//!
//! A desired target state for one aggregate. Saving the command diffs the
//! proposed values against the aggregate, builds one `<Field>Changed` event
//! per changed tracked field and persists them all-or-nothing.

use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::{OperationContext, ValidationErrors};
use crate::error::Result;
use crate::event::Event;
use crate::event_store::EventStore;
use crate::registry::{ConfigurationError, Registry};

use super::{build_events, persist_events, CommandDefinition};

/// Diff request against one aggregate
#[derive(Debug, Clone)]
pub struct FieldCommand {
    registry: Arc<Registry>,
    definition: Arc<CommandDefinition>,
    target: Aggregate,
    actor_id: Option<Uuid>,
    context: OperationContext,
    proposed: Map<String, Value>,
    errors: ValidationErrors,
    events: Vec<Event>,
}

impl FieldCommand {
    /// Create a command for `target`.
    ///
    /// Fails when the target is not of the definition's aggregate type or
    /// the definition does not match the registry.
    pub fn new(
        registry: Arc<Registry>,
        definition: Arc<CommandDefinition>,
        target: Aggregate,
    ) -> std::result::Result<Self, ConfigurationError> {
        if target.aggregate_type() != definition.aggregate_type() {
            return Err(ConfigurationError::AggregateMismatch {
                event_type: format!("{} command", definition.aggregate_type()),
                expected: definition.aggregate_type().to_string(),
                actual: target.aggregate_type().to_string(),
            });
        }
        definition.validate(&registry)?;

        Ok(Self {
            registry,
            definition,
            target,
            actor_id: None,
            context: OperationContext::default(),
            proposed: Map::new(),
            errors: ValidationErrors::new(),
            events: Vec::new(),
        })
    }

    /// Create a command whose proposed values start as the target's
    /// current values for `fields` (e.g. to prefill a form).
    pub fn from_model(
        registry: Arc<Registry>,
        definition: Arc<CommandDefinition>,
        target: Aggregate,
        fields: &[&str],
    ) -> std::result::Result<Self, ConfigurationError> {
        let proposed: Map<String, Value> = fields
            .iter()
            .filter_map(|field| {
                target
                    .get(field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect();

        let mut command = Self::new(registry, definition, target)?;
        command.proposed = proposed;
        Ok(command)
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Merge proposed values
    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.proposed.extend(values);
        self
    }

    /// Propose a value for one field
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.proposed.insert(field.into(), value.into());
        self
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn target(&self) -> &Aggregate {
        &self.target
    }

    pub fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.actor_id
    }

    pub fn proposed(&self) -> &Map<String, Value> {
        &self.proposed
    }

    /// Field errors gathered by the last non-raising save
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Events of the last save; persisted only if that save succeeded
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Check if the target has never been saved
    pub fn is_new_record(&self) -> bool {
        !self.target.is_persisted()
    }

    // =========================================================================
    // Diff & persist
    // =========================================================================

    /// Events for every tracked field whose proposed value changes the target
    pub fn build_events(&self) -> std::result::Result<Vec<Event>, ConfigurationError> {
        build_events(
            &self.registry,
            &self.target,
            &self.proposed,
            self.definition.tracked(),
            self.actor_id,
            &self.context,
        )
    }

    /// Persist the changed-field events in one transaction.
    ///
    /// See [`persist_events`] for the two failure modes. On success the
    /// target is replaced by the aggregate as saved by the last event.
    pub async fn persist<S>(&mut self, store: &S, raise_on_error: bool) -> Result<bool>
    where
        S: EventStore + ?Sized,
    {
        self.errors.clear();
        let mut events = self.build_events()?;

        tracing::debug!(
            "Persisting {} command with {} changed fields",
            self.definition.aggregate_type(),
            events.len()
        );

        let result = persist_events(
            store,
            &self.registry,
            &mut events,
            raise_on_error,
            &mut self.errors,
        )
        .await;

        if let Ok(true) = result {
            if let Some(aggregate) = events.iter().rev().find_map(Event::aggregate) {
                self.target = aggregate.clone();
            }
        }
        self.events = events;
        result
    }

    /// Non-raising save: `Ok(false)` with `errors()` filled on failure
    pub async fn save<S>(&mut self, store: &S) -> Result<bool>
    where
        S: EventStore + ?Sized,
    {
        self.persist(store, false).await
    }

    /// Raising save: the first failure is returned as `Err`
    pub async fn save_strict<S>(&mut self, store: &S) -> Result<()>
    where
        S: EventStore + ?Sized,
    {
        self.persist(store, true).await.map(|_| ())
    }
}
