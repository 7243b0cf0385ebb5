//! Query and filter model for the VersionOne data API.
//!
//! A [`Query`] names an asset type, a selection of attributes, an optional
//! filter and optional paging. It renders to the `sel`, `where` and `page`
//! parameters of `rest-1.v1/Data/{AssetType}`.

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use sha2::{Digest, Sha256};
use std::fmt;

use super::meta::{AssetType, AttributeDefinition};

/// Timestamp layout VersionOne compares against: millisecond precision,
/// no offset. Values are UTC wall-clock times.
const V1_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Format a timestamp for use in a filter term.
pub fn format_v1_datetime(value: NaiveDateTime) -> String {
  value.format(V1_DATETIME_FORMAT).to_string()
}

/// Round up to the next whole millisecond, the finest step a filter can express.
///
/// A `>` comparison against the rounded value excludes the original instant.
pub fn ceil_to_millis(value: NaiveDateTime) -> NaiveDateTime {
  let sub_milli = value.nanosecond() % 1_000_000;
  if sub_milli == 0 {
    value
  } else {
    value + TimeDelta::nanoseconds(i64::from(1_000_000 - sub_milli))
  }
}

/// Whether [`quote_value`] can represent `value` in a `where` clause.
///
/// There is no escape syntax, so a value holding both quote characters
/// cannot be written.
pub fn is_quotable(value: &str) -> bool {
  !(value.contains('\'') && value.contains('"'))
}

/// Parse a timestamp as returned by the data API.
///
/// Accepts values with or without fractional seconds and with an
/// optional trailing `Z`.
pub fn parse_v1_datetime(value: &str) -> Option<NaiveDateTime> {
  let trimmed = value.trim().trim_end_matches('Z');
  NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Comparison operator of a filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
  Equal,
  Greater,
}

impl FilterOp {
  fn symbol(self) -> &'static str {
    match self {
      FilterOp::Equal => "=",
      FilterOp::Greater => ">",
    }
  }
}

/// A single comparison against an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTerm {
  attribute: AttributeDefinition,
  op: FilterOp,
  value: String,
}

impl FilterTerm {
  pub fn equal(attribute: &AttributeDefinition, value: impl Into<String>) -> Self {
    Self {
      attribute: attribute.clone(),
      op: FilterOp::Equal,
      value: value.into(),
    }
  }

  pub fn greater(attribute: &AttributeDefinition, value: impl Into<String>) -> Self {
    Self {
      attribute: attribute.clone(),
      op: FilterOp::Greater,
      value: value.into(),
    }
  }

  #[allow(dead_code)]
  pub fn attribute(&self) -> &AttributeDefinition {
    &self.attribute
  }

  #[allow(dead_code)]
  pub fn op(&self) -> FilterOp {
    self.op
  }

  #[allow(dead_code)]
  pub fn value(&self) -> &str {
    &self.value
  }

  fn render(&self) -> String {
    format!(
      "{}{}{}",
      self.attribute.name(),
      self.op.symbol(),
      quote_value(&self.value)
    )
  }
}

/// Conjunction of filter terms. A single term is the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
  terms: Vec<FilterTerm>,
}

impl Filter {
  pub fn and(terms: impl IntoIterator<Item = FilterTerm>) -> Self {
    Self {
      terms: terms.into_iter().collect(),
    }
  }

  #[allow(dead_code)]
  pub fn terms(&self) -> &[FilterTerm] {
    &self.terms
  }

  /// Render as a `where` clause; VersionOne uses `;` for AND.
  pub fn render(&self) -> String {
    self
      .terms
      .iter()
      .map(FilterTerm::render)
      .collect::<Vec<_>>()
      .join(";")
  }
}

impl From<FilterTerm> for Filter {
  fn from(term: FilterTerm) -> Self {
    Self { terms: vec![term] }
  }
}

/// Quote a literal for a `where` clause. Single quotes are the norm;
/// values containing one are wrapped in double quotes instead.
fn quote_value(value: &str) -> String {
  if value.contains('\'') {
    format!("\"{}\"", value)
  } else {
    format!("'{}'", value)
  }
}

/// Page window: `size` records starting at offset `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
  pub size: u32,
  pub start: u32,
}

impl Paging {
  pub fn new(size: u32, start: u32) -> Self {
    Self { size, start }
  }
}

impl fmt::Display for Paging {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{},{}", self.size, self.start)
  }
}

/// A read query against one asset type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
  asset_type: AssetType,
  selection: Vec<AttributeDefinition>,
  filter: Option<Filter>,
  paging: Option<Paging>,
}

impl Query {
  pub fn new(asset_type: &AssetType) -> Self {
    Self {
      asset_type: asset_type.clone(),
      selection: Vec::new(),
      filter: None,
      paging: None,
    }
  }

  /// Add an attribute to the selection. Duplicates are ignored.
  pub fn select(mut self, attribute: &AttributeDefinition) -> Self {
    if !self.selection.contains(attribute) {
      self.selection.push(attribute.clone());
    }
    self
  }

  pub fn with_filter(mut self, filter: impl Into<Filter>) -> Self {
    self.filter = Some(filter.into());
    self
  }

  pub fn with_paging(mut self, paging: Paging) -> Self {
    self.paging = Some(paging);
    self
  }

  pub fn asset_type(&self) -> &AssetType {
    &self.asset_type
  }

  #[allow(dead_code)]
  pub fn selection(&self) -> &[AttributeDefinition] {
    &self.selection
  }

  #[allow(dead_code)]
  pub fn filter(&self) -> Option<&Filter> {
    self.filter.as_ref()
  }

  pub fn paging(&self) -> Option<Paging> {
    self.paging
  }

  /// `sel` and `where` parameters. Paging is added by the client.
  pub fn to_params(&self) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if !self.selection.is_empty() {
      let sel = self
        .selection
        .iter()
        .map(AttributeDefinition::name)
        .collect::<Vec<_>>()
        .join(",");
      params.push(("sel".to_string(), sel));
    }
    if let Some(filter) = &self.filter {
      params.push(("where".to_string(), filter.render()));
    }
    params
  }

  /// Short stable digest of the rendered query, used to correlate log lines.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.asset_type.token().as_bytes());
    for (key, value) in self.to_params() {
      hasher.update(b"&");
      hasher.update(key.as_bytes());
      hasher.update(b"=");
      hasher.update(value.as_bytes());
    }
    if let Some(paging) = self.paging {
      hasher.update(format!("&page={}", paging).as_bytes());
    }
    hex::encode(&hasher.finalize()[..6])
  }
}
