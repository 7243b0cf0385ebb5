//! VersionOne access: schema handles, queries, and the REST client.

pub mod api_types;
pub mod client;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod meta;
pub mod query;
pub mod service;

pub use client::V1Client;
pub use error::ServiceError;
pub use meta::{AssetType, AttributeDefinition};
pub use query::{
  ceil_to_millis, format_v1_datetime, is_quotable, parse_v1_datetime, Filter, FilterTerm, Paging,
  Query,
};
pub use service::{Asset, AssetService, QueryResult};
