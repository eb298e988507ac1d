//! Command module
//!
//! Field-diffing commands: compute the minimal set of changed-field events
//! for a desired aggregate state and commit them atomically.

mod definition;
mod diff;
mod field_command;

pub use definition::{CommandDefinition, TrackedField};
pub use diff::{build_events, persist_events};
pub use field_command::FieldCommand;
