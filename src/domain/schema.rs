//! Payload Schema
//!
//! Fixed mapping from payload field name to value kind, declared once per
//! event type.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationErrors;

/// Kind of value a payload field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    /// Exact decimal, as a JSON number or a numeric string
    Decimal,
    Boolean,
    Uuid,
    /// RFC 3339 timestamp string
    Timestamp,
    /// Any JSON value
    Json,
}

impl FieldKind {
    /// Check a non-null value against this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Decimal => match value {
                Value::Number(n) => Decimal::from_str(&n.to_string()).is_ok(),
                Value::String(s) => Decimal::from_str(s).is_ok(),
                _ => false,
            },
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Uuid => value.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()),
            FieldKind::Timestamp => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldKind::Json => true,
        }
    }

    /// Message used when a value does not match
    pub fn mismatch_message(&self) -> &'static str {
        match self {
            FieldKind::String => "must be a string",
            FieldKind::Integer => "must be an integer",
            FieldKind::Decimal => "must be a decimal number",
            FieldKind::Boolean => "must be a boolean",
            FieldKind::Uuid => "must be a UUID",
            FieldKind::Timestamp => "must be an RFC 3339 timestamp",
            FieldKind::Json => "must be valid JSON",
        }
    }
}

/// Declaration of one payload field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Typed payload schema of an event type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSchema {
    fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional field
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.declare(name.into(), kind, false)
    }

    /// Declare a field that must be present and non-null
    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.declare(name.into(), kind, true)
    }

    fn declare(mut self, name: String, kind: FieldKind, required: bool) -> Self {
        // Redeclaring a field replaces the earlier declaration.
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldSpec {
            name,
            kind,
            required,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// First payload key that the schema does not declare
    pub fn undeclared_field<'a>(&self, payload: &'a Map<String, Value>) -> Option<&'a str> {
        payload
            .keys()
            .find(|key| !self.contains(key))
            .map(String::as_str)
    }

    /// Validate payload values against their declared kinds
    pub fn validate(&self, payload: &Map<String, Value>) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        for spec in &self.fields {
            match payload.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        errors.add(&spec.name, "can't be blank");
                    }
                }
                Some(value) if !spec.kind.accepts(value) => {
                    errors.add(&spec.name, spec.kind.mismatch_message());
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = self.undeclared_field(payload) {
            errors.add(unknown, "is not a declared payload field");
        }

        errors.into_result()
    }
}
