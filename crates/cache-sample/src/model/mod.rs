//! # Sample Models
//!
//! Schemas for the two record types the sample serves, and typed views that
//! deserialize from a [`Record`](record_cache::Record).

mod person;
mod tag;

pub use person::*;
pub use tag::*;

use record_cache::ModelSchema;

/// Every schema the sample registers.
pub fn schemas() -> Vec<ModelSchema> {
    vec![person_schema(), tag_schema()]
}
