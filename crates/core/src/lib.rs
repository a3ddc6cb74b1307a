//! `mediaproc-core`: identifiers and the shared domain error.
//!
//! No I/O and no async here; every other crate builds on these types.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, OwnerId, ResultId, UnitId};
