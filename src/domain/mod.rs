//! Domain module
//!
//! Core value types shared by events, aggregates and commands.

pub mod context;
pub mod error;
pub mod schema;

pub use context::OperationContext;
pub use error::{FieldError, ValidationErrors, BASE_FIELD};
pub use schema::{FieldKind, FieldSpec, PayloadSchema};
