//! The capability set the backlog cache needs from VersionOne.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ServiceError;
use super::meta::{AssetType, AttributeDefinition};
use super::query::Query;

/// Schema lookup and query execution against a VersionOne instance.
#[async_trait]
pub trait AssetService: Send + Sync {
  /// Resolve an asset type by name. Unknown names are an error.
  async fn asset_type(&self, name: &str) -> Result<AssetType, ServiceError>;

  /// Resolve an attribute (or dotted attribute path) of an asset type.
  async fn attribute(
    &self,
    asset_type: &AssetType,
    name: &str,
  ) -> Result<AttributeDefinition, ServiceError>;

  /// Execute a query.
  ///
  /// With explicit paging only that page is returned; without it the
  /// complete result set is returned.
  async fn retrieve(&self, query: &Query) -> Result<QueryResult, ServiceError>;
}

#[async_trait]
impl<S: AssetService + ?Sized> AssetService for Arc<S> {
  async fn asset_type(&self, name: &str) -> Result<AssetType, ServiceError> {
    (**self).asset_type(name).await
  }

  async fn attribute(
    &self,
    asset_type: &AssetType,
    name: &str,
  ) -> Result<AttributeDefinition, ServiceError> {
    (**self).attribute(asset_type, name).await
  }

  async fn retrieve(&self, query: &Query) -> Result<QueryResult, ServiceError> {
    (**self).retrieve(query).await
  }
}

/// Outcome of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
  /// Number of matching assets on the server, regardless of paging.
  pub total_available: u64,
  pub assets: Vec<Asset>,
}

/// One returned asset with the attribute values that were selected.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
  oid: String,
  attributes: HashMap<String, Value>,
}

impl Asset {
  pub fn new(oid: impl Into<String>) -> Self {
    Self {
      oid: oid.into(),
      attributes: HashMap::new(),
    }
  }

  /// Builder-style setter, keyed by attribute name.
  pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.attributes.insert(name.into(), value.into());
    self
  }

  /// Object id, e.g. `Story:1234`.
  pub fn oid(&self) -> &str {
    &self.oid
  }

  /// Raw value by attribute name. `None` when the attribute was not returned.
  pub fn value(&self, name: &str) -> Option<&Value> {
    self.attributes.get(name)
  }

  /// Raw value for an attribute handle.
  pub fn get(&self, attribute: &AttributeDefinition) -> Option<&Value> {
    self.value(attribute.name())
  }

  /// Value as text. Missing, null and empty multi-value attributes all
  /// come back as `None`.
  pub fn text(&self, attribute: &AttributeDefinition) -> Option<String> {
    value_to_text(self.get(attribute)?)
  }
}

fn value_to_text(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Array(items) => {
      let parts: Vec<String> = items.iter().filter_map(value_to_text).collect();
      if parts.is_empty() {
        None
      } else {
        Some(parts.join(", "))
      }
    }
    Value::Object(obj) => obj
      .get("idref")
      .or_else(|| obj.get("_oid"))
      .and_then(Value::as_str)
      .map(String::from),
  }
}
