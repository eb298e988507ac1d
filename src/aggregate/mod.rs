//! Aggregate module
//!
//! Aggregate rows that events are applied to.

mod record;

pub use record::Aggregate;
