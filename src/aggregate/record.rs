//! Aggregate Record
//!
//! The persisted entity events are applied to. Attributes are a JSON map
//! whose shape belongs to the consumer; the core only needs identity,
//! lock-ability and save semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::changes;

/// Aggregate row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Declared aggregate type name, e.g. "Post"
    aggregate_type: String,

    /// Unique ID, absent until the first save
    id: Option<Uuid>,

    /// Consumer-defined fields
    attributes: Map<String, Value>,

    /// Number of saves applied to the row
    version: i64,

    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate {
    /// Build a new, unsaved aggregate with no attributes
    pub fn new(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: None,
            attributes: Map::new(),
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Build a new, unsaved aggregate from initial attributes
    pub fn with_attributes(aggregate_type: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            attributes,
            ..Self::new(aggregate_type)
        }
    }

    /// Rebuild an aggregate read from storage
    pub fn from_row(
        aggregate_type: impl Into<String>,
        id: Uuid,
        attributes: Map<String, Value>,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: Some(id),
            attributes,
            version,
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Check if the aggregate has been saved at least once
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Current value of a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Check if writing `proposed` to `field` would be a change
    pub fn would_change(&self, field: &str, proposed: Option<&Value>) -> bool {
        changes::has_changed(self.get(field), proposed)
    }

    // =========================================================================
    // Mutation (aggregators)
    // =========================================================================

    /// Assign a field
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(field.into(), value.into());
    }

    /// Remove a field, returning its previous value
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.attributes.remove(field)
    }

    // =========================================================================
    // Store hooks
    // =========================================================================

    /// Record the outcome of a save: identity on first save, bumped version
    /// and timestamps every time.
    pub fn mark_saved(&mut self, id: Uuid, version: i64, saved_at: DateTime<Utc>) {
        if self.id.is_none() {
            self.created_at = Some(saved_at);
        }
        self.id = Some(id);
        self.version = version;
        self.updated_at = Some(saved_at);
    }
}
