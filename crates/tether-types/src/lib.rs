//! Shared types, error hierarchy and schema translation for Tether.

pub mod error;
pub mod schema;
pub mod tool;

pub use error::{ConfigError, ToolError};
pub use schema::{Property, Schema, SchemaViolation};
pub use tool::*;
