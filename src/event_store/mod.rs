//! Event Store module
//!
//! Persistence layer for events and the aggregates they apply to.
//! Ports live in `store`; PostgreSQL and in-memory adapters implement them.

mod error;
mod memory;
mod repository;
mod store;

pub use error::StoreError;
pub use memory::{InMemoryEventStore, InMemoryTransaction};
pub use repository::{PgEventStore, PgStoreTransaction};
pub use store::{
    EventQuery, EventReceipt, EventStore, NewEvent, StoreTransaction, StoredEvent,
    DEFAULT_EVENT_LIMIT,
};
