//! Aggregator Registry
//!
//! Maps each event type to the aggregate type it applies to, its payload
//! schema and its aggregator. Built once at startup, immutable afterwards,
//! and passed explicitly to everything that applies events.

mod error;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::domain::{PayloadSchema, ValidationErrors};
use crate::event::Event;

pub use error::ConfigurationError;

// =========================================================================
// Aggregator
// =========================================================================

/// Error returned by an aggregator that refuses an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    /// The event cannot be applied because of one field's value
    #[error("{field} {message}")]
    InvalidField { field: String, message: String },

    /// The event cannot be applied at all
    #[error("event rejected: {0}")]
    Rejected(String),
}

impl AggregatorError {
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Applies an event's payload to its aggregate.
///
/// Implementations only assign aggregate fields. Persisting the aggregate
/// is done by the caller, exactly once, after `apply` returns.
pub trait Aggregator: Send + Sync {
    fn apply(&self, aggregate: &mut Aggregate, event: &Event) -> Result<(), AggregatorError>;
}

impl<F> Aggregator for F
where
    F: Fn(&mut Aggregate, &Event) -> Result<(), AggregatorError> + Send + Sync,
{
    fn apply(&self, aggregate: &mut Aggregate, event: &Event) -> Result<(), AggregatorError> {
        self(aggregate, event)
    }
}

// =========================================================================
// AggregateBinding
// =========================================================================

/// Field-level validation run on an aggregate before it is saved
pub type AggregateValidator = Arc<dyn Fn(&Aggregate) -> Result<(), ValidationErrors> + Send + Sync>;

/// Declared aggregate type events can be bound to
#[derive(Clone)]
pub struct AggregateBinding {
    aggregate_type: String,
    validator: Option<AggregateValidator>,
}

impl AggregateBinding {
    pub fn new(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            validator: None,
        }
    }

    /// Attach a validator run after every aggregator, before save
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&Aggregate) -> Result<(), ValidationErrors> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Validate an aggregate, passing when no validator is attached
    pub fn validate(&self, aggregate: &Aggregate) -> Result<(), ValidationErrors> {
        match &self.validator {
            Some(validator) => validator(aggregate),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AggregateBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateBinding")
            .field("aggregate_type", &self.aggregate_type)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

// =========================================================================
// EventDefinition
// =========================================================================

/// Everything the registry knows about one event type
#[derive(Clone)]
pub struct EventDefinition {
    event_type: String,
    aggregate_type: String,
    schema: Arc<PayloadSchema>,
    aggregator: Arc<dyn Aggregator>,
}

impl EventDefinition {
    /// Define an event type with a closure aggregator
    pub fn new<F>(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        schema: PayloadSchema,
        aggregator: F,
    ) -> Self
    where
        F: Fn(&mut Aggregate, &Event) -> Result<(), AggregatorError> + Send + Sync + 'static,
    {
        Self::with_aggregator(event_type, aggregate_type, schema, aggregator)
    }

    /// Define an event type with any `Aggregator` implementation
    pub fn with_aggregator<A>(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        schema: PayloadSchema,
        aggregator: A,
    ) -> Self
    where
        A: Aggregator + 'static,
    {
        Self {
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            schema: Arc::new(schema),
            aggregator: Arc::new(aggregator),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn schema(&self) -> &PayloadSchema {
        &self.schema
    }

    /// Schema handle kept by draft events of this type
    pub(crate) fn shared_schema(&self) -> Arc<PayloadSchema> {
        Arc::clone(&self.schema)
    }

    pub fn aggregator(&self) -> &dyn Aggregator {
        self.aggregator.as_ref()
    }
}

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("event_type", &self.event_type)
            .field("aggregate_type", &self.aggregate_type)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Registry
// =========================================================================

/// Immutable event type → definition table
#[derive(Debug, Clone, Default)]
pub struct Registry {
    aggregates: HashMap<String, AggregateBinding>,
    events: HashMap<String, EventDefinition>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Definition of an event type
    pub fn definition(&self, event_type: &str) -> Result<&EventDefinition, ConfigurationError> {
        self.events
            .get(event_type)
            .ok_or_else(|| ConfigurationError::AggregatorNotSet(event_type.to_string()))
    }

    /// Binding of an aggregate type
    pub fn binding(&self, aggregate_type: &str) -> Option<&AggregateBinding> {
        self.aggregates.get(aggregate_type)
    }

    /// Registered event types, sorted
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.events.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Collects bindings and definitions, then checks them together
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    aggregates: HashMap<String, AggregateBinding>,
    events: Vec<EventDefinition>,
}

impl RegistryBuilder {
    /// Register an aggregate type without validation
    pub fn aggregate(self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_binding(AggregateBinding::new(aggregate_type))
    }

    pub fn aggregate_binding(mut self, binding: AggregateBinding) -> Self {
        self.aggregates
            .insert(binding.aggregate_type.clone(), binding);
        self
    }

    pub fn event(mut self, definition: EventDefinition) -> Self {
        self.events.push(definition);
        self
    }

    /// Freeze the registry, rejecting duplicate event types and events
    /// bound to unknown aggregate types.
    pub fn build(self) -> Result<Registry, ConfigurationError> {
        let mut events = HashMap::with_capacity(self.events.len());

        for definition in self.events {
            if !self.aggregates.contains_key(&definition.aggregate_type) {
                return Err(ConfigurationError::UnboundAggregate {
                    event_type: definition.event_type,
                    aggregate_type: definition.aggregate_type,
                });
            }
            if events.contains_key(&definition.event_type) {
                return Err(ConfigurationError::DuplicateEventType(definition.event_type));
            }
            events.insert(definition.event_type.clone(), definition);
        }

        tracing::debug!(
            "Registry built with {} aggregate types and {} event types",
            self.aggregates.len(),
            events.len()
        );

        Ok(Registry {
            aggregates: self.aggregates,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldKind;

    fn title_changed() -> EventDefinition {
        EventDefinition::new(
            "Post::TitleChanged",
            "Post",
            PayloadSchema::new().required("title", FieldKind::String),
            |post, event| {
                post.set("title", event.get("title").cloned().unwrap_or_default());
                Ok(())
            },
        )
    }

    #[test]
    fn test_build_and_lookup() {
        let registry = Registry::builder()
            .aggregate("Post")
            .event(title_changed())
            .build()
            .unwrap();

        let definition = registry.definition("Post::TitleChanged").unwrap();
        assert_eq!(definition.aggregate_type(), "Post");
        assert!(definition.schema().contains("title"));
        assert_eq!(registry.event_types(), vec!["Post::TitleChanged"]);
        assert!(registry.binding("Post").is_some());
    }

    #[test]
    fn test_missing_aggregator_is_configuration_error() {
        let registry = Registry::builder().aggregate("Post").build().unwrap();

        let err = registry.definition("Post::BodyChanged").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::AggregatorNotSet("Post::BodyChanged".to_string())
        );
        assert!(err.to_string().contains("aggregator has not been set"));
    }

    #[test]
    fn test_unbound_aggregate_is_rejected() {
        let err = Registry::builder()
            .event(title_changed())
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::UnboundAggregate { .. }));
    }

    #[test]
    fn test_duplicate_event_type_is_rejected() {
        let err = Registry::builder()
            .aggregate("Post")
            .event(title_changed())
            .event(title_changed())
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::DuplicateEventType("Post::TitleChanged".to_string())
        );
    }

    #[test]
    fn test_binding_validator() {
        let binding = AggregateBinding::new("Post").with_validator(|post| {
            if post.get_str("title").is_some_and(str::is_empty) {
                return Err(ValidationErrors::single("title", "can't be blank"));
            }
            Ok(())
        });

        let mut post = Aggregate::new("Post");
        assert!(binding.validate(&post).is_ok());

        post.set("title", "");
        let errors = binding.validate(&post).unwrap_err();
        assert_eq!(errors.messages_for("title"), vec!["can't be blank"]);
    }
}
