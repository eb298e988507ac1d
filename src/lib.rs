//! event_src Library
//!
//! Transactional event sourcing: events are applied to lock-protected
//! aggregates inside a store transaction, and field-diffing commands turn
//! a desired aggregate state into an atomic batch of changed-field events.

pub mod aggregate;
pub mod changes;
pub mod command;
pub mod domain;
pub mod event;
pub mod event_store;
pub mod registry;

pub mod config;
pub mod db;
mod error;

pub use aggregate::Aggregate;
pub use command::{CommandDefinition, FieldCommand};
pub use config::Config;
pub use domain::{FieldKind, OperationContext, PayloadSchema, ValidationErrors};
pub use error::{Error, Result};
pub use event::{Event, EventState};
pub use event_store::{EventStore, InMemoryEventStore, PgEventStore, StoreError, StoreTransaction};
pub use registry::{AggregateBinding, AggregatorError, ConfigurationError, EventDefinition, Registry};
