//! Builds the queries the backlog cache runs.

use chrono::NaiveDateTime;

use crate::config::BacklogConfig;
use crate::v1::{
  ceil_to_millis, format_v1_datetime, is_quotable, AssetService, AssetType, AttributeDefinition, Filter, FilterTerm, Paging,
  Query,
};

use super::error::BacklogError;

/// Schema handles for the tracked work items, resolved once.
#[derive(Debug, Clone)]
pub struct BacklogQueries {
  scope: String,
  asset_type: AssetType,
  number: AttributeDefinition,
  name: AttributeDefinition,
  change: AttributeDefinition,
  parent_scopes: AttributeDefinition,
  tag: Option<AttributeDefinition>,
}

impl BacklogQueries {
  /// Resolve every configured name against the remote schema.
  ///
  /// Unknown asset types or attributes are a `Configuration` error.
  pub async fn resolve<S: AssetService + ?Sized>(
    service: &S,
    config: &BacklogConfig,
  ) -> Result<Self, BacklogError> {
    if !is_quotable(&config.scope) {
      return Err(BacklogError::Configuration(format!(
        "scope name cannot contain both ' and \": {}",
        config.scope
      )));
    }

    let asset_type = service.asset_type(&config.asset_type).await?;
    let number = service
      .attribute(&asset_type, &config.number_attribute)
      .await?;
    let name = service.attribute(&asset_type, &config.name_attribute).await?;
    let change = service
      .attribute(&asset_type, &config.change_attribute)
      .await?;
    let parent_scopes = service
      .attribute(&asset_type, &config.scope_attribute)
      .await?;
    let tag = match &config.tag_attribute {
      Some(tag) => Some(service.attribute(&asset_type, tag).await?),
      None => None,
    };

    Ok(Self {
      scope: config.scope.clone(),
      asset_type,
      number,
      name,
      change,
      parent_scopes,
      tag,
    })
  }

  pub fn scope(&self) -> &str {
    &self.scope
  }

  pub fn number(&self) -> &AttributeDefinition {
    &self.number
  }

  pub fn name(&self) -> &AttributeDefinition {
    &self.name
  }

  pub fn change(&self) -> &AttributeDefinition {
    &self.change
  }

  pub fn tag(&self) -> Option<&AttributeDefinition> {
    self.tag.as_ref()
  }

  fn scope_term(&self) -> FilterTerm {
    FilterTerm::equal(&self.parent_scopes, self.scope.as_str())
  }

  /// Query for every tracked item in scope: number, name, change date and tag.
  pub fn build_query_for_my_backlog_items(&self) -> Query {
    let query = Query::new(&self.asset_type)
      .select(&self.number)
      .select(&self.name)
      .select(&self.change);
    let query = match &self.tag {
      Some(tag) => query.select(tag),
      None => query,
    };
    query.with_filter(self.scope_term())
  }

  /// Probe for items in scope changed strictly after `watermark`.
  ///
  /// Selects only the change date and asks for a single row; the caller
  /// only needs the total count. The watermark is rounded up to a whole
  /// millisecond so the newest loaded item never matches itself.
  pub fn build_changed_since(&self, watermark: NaiveDateTime) -> Query {
    Query::new(&self.asset_type)
      .select(&self.change)
      .with_filter(Filter::and([
        self.scope_term(),
        FilterTerm::greater(&self.change, format_v1_datetime(ceil_to_millis(watermark))),
      ]))
      .with_paging(Paging::new(1, 0))
  }
}
