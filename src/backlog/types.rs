use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One cached work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogItem {
  pub number: String,
  pub name: String,
  /// Custom tag field; `None` when unset on the server
  pub tag: Option<String>,
}

/// Immutable snapshot of the cache, keyed by item number
pub type Backlog = Arc<HashMap<String, BacklogItem>>;
