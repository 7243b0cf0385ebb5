//! Serde-deserializable types matching VersionOne API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use std::collections::HashMap;

use super::meta::{AssetTypeMeta, AttributeMeta};
use super::service::Asset;

// ============================================================================
// Data API (rest-1.v1/Data)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAssets {
  #[serde(default)]
  pub total: u64,
  #[serde(rename = "pageSize", default)]
  pub page_size: u64,
  #[serde(rename = "pageStart", default)]
  pub page_start: u64,
  #[serde(rename = "Assets", default)]
  pub assets: Vec<ApiAsset>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAsset {
  #[serde(default)]
  pub id: String,
  #[serde(rename = "Attributes", default)]
  pub attributes: HashMap<String, ApiAttribute>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAttribute {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub value: serde_json::Value,
}

// ============================================================================
// Meta API (meta.v1)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiAssetTypeMeta {
  #[serde(rename = "Token")]
  pub token: String,
  #[serde(rename = "Attributes", default)]
  pub attributes: HashMap<String, ApiAttributeDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAttributeDefinition {
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "AttributeType", default)]
  pub attribute_type: String,
  #[serde(rename = "IsMultivalue", default)]
  pub is_multivalue: bool,
  #[serde(rename = "RelatedAsset")]
  pub related_asset: Option<ApiAssetRef>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAssetRef {
  pub nameref: String,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiAsset> for Asset {
  fn from(api: ApiAsset) -> Self {
    api
      .attributes
      .into_iter()
      .fold(Asset::new(api.id), |asset, (key, attr)| {
        // The attribute's own name is authoritative; the map key is a fallback
        let name = if attr.name.is_empty() { key } else { attr.name };
        asset.with(name, attr.value)
      })
  }
}

impl From<ApiAssetTypeMeta> for AssetTypeMeta {
  fn from(api: ApiAssetTypeMeta) -> Self {
    let attributes = api
      .attributes
      .into_values()
      .map(|def| {
        (
          def.name,
          AttributeMeta {
            attribute_type: def.attribute_type,
            is_multivalue: def.is_multivalue,
            related_asset: def.related_asset.map(|r| r.nameref),
          },
        )
      })
      .collect();

    AssetTypeMeta {
      token: api.token,
      attributes,
    }
  }
}
