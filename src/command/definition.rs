//! Command Definition
//!
//! Which aggregate fields a command tracks, and the event type each one
//! produces when it changes.

use crate::event::camelize;
use crate::registry::{ConfigurationError, Registry};

/// A tracked field and the event type emitted when it changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedField {
    pub field: String,
    pub event_type: String,
}

/// Tracked fields of one aggregate type, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    aggregate_type: String,
    tracked: Vec<TrackedField>,
}

impl CommandDefinition {
    pub fn new(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            tracked: Vec::new(),
        }
    }

    /// Conventional event type for a changed field:
    /// `("Post", "due_date")` → `Post::DueDateChanged`
    pub fn changed_event_type(aggregate_type: &str, field: &str) -> String {
        format!("{}::{}Changed", aggregate_type, camelize(field))
    }

    /// Track `field`, emitting `event_type` when it changes
    pub fn track(mut self, field: impl Into<String>, event_type: impl Into<String>) -> Self {
        let field = field.into();
        self.tracked.retain(|t| t.field != field);
        self.tracked.push(TrackedField {
            field,
            event_type: event_type.into(),
        });
        self
    }

    /// Track each field with its conventional `<Field>Changed` event type
    pub fn track_changes(self, fields: &[&str]) -> Self {
        fields.iter().fold(self, |definition, field| {
            let event_type = Self::changed_event_type(&definition.aggregate_type, field);
            definition.track(*field, event_type)
        })
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn tracked(&self) -> &[TrackedField] {
        &self.tracked
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.tracked.iter().any(|t| t.field == field)
    }

    /// Check that every tracked event type is registered, belongs to this
    /// aggregate type and declares its field in the payload schema.
    pub fn validate(&self, registry: &Registry) -> Result<(), ConfigurationError> {
        for tracked in &self.tracked {
            let definition = registry.definition(&tracked.event_type)?;

            if definition.aggregate_type() != self.aggregate_type {
                return Err(ConfigurationError::AggregateMismatch {
                    event_type: tracked.event_type.clone(),
                    expected: self.aggregate_type.clone(),
                    actual: definition.aggregate_type().to_string(),
                });
            }
            if !definition.schema().contains(&tracked.field) {
                return Err(ConfigurationError::UndeclaredField {
                    event_type: tracked.event_type.clone(),
                    field: tracked.field.clone(),
                });
            }
        }
        Ok(())
    }
}
