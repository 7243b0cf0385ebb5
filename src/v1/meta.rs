//! Schema handles resolved through the VersionOne meta API.

use std::collections::HashMap;
use std::fmt;

/// Handle to an asset type (e.g. `PrimaryWorkitem`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetType {
  token: String,
}

impl AssetType {
  pub fn new(token: impl Into<String>) -> Self {
    Self {
      token: token.into(),
    }
  }

  pub fn token(&self) -> &str {
    &self.token
  }
}

impl fmt::Display for AssetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.token)
  }
}

/// Handle to an attribute of an asset type.
///
/// `name` may be a dotted path that traverses relations
/// (e.g. `Scope.ParentMeAndUp.Name`); it is what the data API
/// expects in `sel` and `where` and what it echoes back in results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeDefinition {
  asset_type: String,
  name: String,
  attribute_type: String,
  is_multivalue: bool,
}

impl AttributeDefinition {
  pub fn new(
    asset_type: &AssetType,
    name: impl Into<String>,
    attribute_type: impl Into<String>,
    is_multivalue: bool,
  ) -> Self {
    Self {
      asset_type: asset_type.token().to_string(),
      name: name.into(),
      attribute_type: attribute_type.into(),
      is_multivalue,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Fully qualified token, e.g. `PrimaryWorkitem.Number`.
  pub fn token(&self) -> String {
    format!("{}.{}", self.asset_type, self.name)
  }

  #[allow(dead_code)]
  pub fn asset_type(&self) -> &str {
    &self.asset_type
  }

  #[allow(dead_code)]
  pub fn attribute_type(&self) -> &str {
    &self.attribute_type
  }

  #[allow(dead_code)]
  pub fn is_multivalue(&self) -> bool {
    self.is_multivalue
  }
}

impl fmt::Display for AttributeDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.asset_type, self.name)
  }
}

/// Parsed meta description of one asset type.
#[derive(Debug, Clone)]
pub struct AssetTypeMeta {
  pub token: String,
  /// Attribute definitions keyed by their short name.
  pub attributes: HashMap<String, AttributeMeta>,
}

/// One attribute as described by the meta API.
#[derive(Debug, Clone)]
pub struct AttributeMeta {
  pub attribute_type: String,
  pub is_multivalue: bool,
  /// Target asset type for relation attributes.
  pub related_asset: Option<String>,
}
