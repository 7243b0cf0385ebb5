//! Backlog items and the queries that fetch them.

mod error;
mod query_builder;
mod types;

pub use error::BacklogError;
pub use query_builder::BacklogQueries;
pub use types::{Backlog, BacklogItem};
