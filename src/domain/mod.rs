//! Domain layer types and invariants.

pub mod error;
pub mod model;
pub mod query;
pub mod record;
