//! Configuration Errors
//!
//! Wiring mistakes in the registry or a command definition. These are not
//! recoverable at runtime.

/// Errors raised when events, aggregates and commands are wired incorrectly
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// No definition (and thus no aggregator) for an event type
    #[error("aggregator has not been set on: {0}")]
    AggregatorNotSet(String),

    /// Event type bound to an aggregate type that was never registered
    #[error("event {event_type} must belong to an aggregate: {aggregate_type} is not registered")]
    UnboundAggregate {
        event_type: String,
        aggregate_type: String,
    },

    /// Event type registered twice
    #[error("event type registered twice: {0}")]
    DuplicateEventType(String),

    /// Payload key not declared by the event's schema
    #[error("{field} is not a payload field of {event_type}")]
    UndeclaredField { event_type: String, field: String },

    /// Command tracks an event that belongs to a different aggregate
    #[error("{event_type} applies to {actual}, but the command targets {expected}")]
    AggregateMismatch {
        event_type: String,
        expected: String,
        actual: String,
    },
}
