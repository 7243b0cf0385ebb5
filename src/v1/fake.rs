//! In-memory `AssetService` used by tests.
//!
//! Evaluates filters and selections against a list of assets the test
//! controls, counts calls, and can be told to fail probes or full fetches.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::error::ServiceError;
use super::meta::{AssetType, AttributeDefinition};
use super::query::{parse_v1_datetime, FilterOp, FilterTerm, Query};
use super::service::{Asset, AssetService, QueryResult};

pub struct FakeAssetService {
  schema: HashMap<String, Vec<String>>,
  assets: Mutex<Vec<Asset>>,
  fetch_delay: Mutex<Duration>,
  fail_probes: AtomicBool,
  fail_full_fetches: AtomicBool,
  probes: AtomicUsize,
  full_fetches: AtomicUsize,
}

impl FakeAssetService {
  pub fn new() -> Self {
    Self {
      schema: HashMap::new(),
      assets: Mutex::new(Vec::new()),
      fetch_delay: Mutex::new(Duration::ZERO),
      fail_probes: AtomicBool::new(false),
      fail_full_fetches: AtomicBool::new(false),
      probes: AtomicUsize::new(0),
      full_fetches: AtomicUsize::new(0),
    }
  }

  /// A service that knows `PrimaryWorkitem` with the attributes the
  /// backlog cache uses by default.
  pub fn backlog() -> Self {
    Self::new().with_asset_type(
      "PrimaryWorkitem",
      &[
        "Number",
        "Name",
        "ChangeDateUTC",
        "Custom_Tags2",
        "Scope.ParentMeAndUp.Name",
      ],
    )
  }

  pub fn with_asset_type(mut self, token: &str, attributes: &[&str]) -> Self {
    self.schema.insert(
      token.to_string(),
      attributes.iter().map(|a| a.to_string()).collect(),
    );
    self
  }

  pub fn set_assets(&self, assets: Vec<Asset>) {
    *self.assets.lock().unwrap() = assets;
  }

  pub fn push(&self, asset: Asset) {
    self.assets.lock().unwrap().push(asset);
  }

  pub fn set_fetch_delay(&self, delay: Duration) {
    *self.fetch_delay.lock().unwrap() = delay;
  }

  pub fn fail_probes(&self, fail: bool) {
    self.fail_probes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_full_fetches(&self, fail: bool) {
    self.fail_full_fetches.store(fail, Ordering::SeqCst);
  }

  pub fn probe_count(&self) -> usize {
    self.probes.load(Ordering::SeqCst)
  }

  pub fn full_fetch_count(&self) -> usize {
    self.full_fetches.load(Ordering::SeqCst)
  }
}

/// A work item in scope `scope`, which sits under the `Company` root scope.
pub fn workitem(number: &str, name: &str, tag: Option<&str>, changed: &str, scope: &str) -> Asset {
  Asset::new(format!("Story:{}", number))
    .with("Number", number)
    .with("Name", name)
    .with("Custom_Tags2", tag.map(Value::from).unwrap_or(Value::Null))
    .with("ChangeDateUTC", changed)
    .with(
      "Scope.ParentMeAndUp.Name",
      Value::from(vec![scope, "Company"]),
    )
}

fn term_matches(asset: &Asset, term: &FilterTerm) -> bool {
  let candidates: Vec<&str> = match asset.value(term.attribute().name()) {
    Some(Value::String(s)) => vec![s.as_str()],
    Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
    _ => Vec::new(),
  };

  candidates.into_iter().any(|candidate| match term.op() {
    FilterOp::Equal => candidate == term.value(),
    FilterOp::Greater => match (parse_v1_datetime(candidate), parse_v1_datetime(term.value())) {
      (Some(a), Some(b)) => a > b,
      _ => candidate > term.value(),
    },
  })
}

fn project(asset: &Asset, selection: &[AttributeDefinition]) -> Asset {
  selection.iter().fold(Asset::new(asset.oid()), |out, attr| {
    match asset.value(attr.name()) {
      Some(value) => out.with(attr.name(), value.clone()),
      None => out,
    }
  })
}

#[async_trait]
impl AssetService for FakeAssetService {
  async fn asset_type(&self, name: &str) -> Result<AssetType, ServiceError> {
    if self.schema.contains_key(name) {
      Ok(AssetType::new(name))
    } else {
      Err(ServiceError::UnknownAssetType(name.to_string()))
    }
  }

  async fn attribute(
    &self,
    asset_type: &AssetType,
    name: &str,
  ) -> Result<AttributeDefinition, ServiceError> {
    let known = self
      .schema
      .get(asset_type.token())
      .is_some_and(|attrs| attrs.iter().any(|a| a == name));
    if known {
      Ok(AttributeDefinition::new(asset_type, name, "Text", false))
    } else {
      Err(ServiceError::UnknownAttribute {
        asset_type: asset_type.token().to_string(),
        attribute: name.to_string(),
      })
    }
  }

  async fn retrieve(&self, query: &Query) -> Result<QueryResult, ServiceError> {
    let is_probe = query.paging().is_some();
    if is_probe {
      self.probes.fetch_add(1, Ordering::SeqCst);
      if self.fail_probes.load(Ordering::SeqCst) {
        return Err(ServiceError::Status {
          status: 503,
          body: "probe unavailable".to_string(),
        });
      }
    } else {
      self.full_fetches.fetch_add(1, Ordering::SeqCst);
      let delay = *self.fetch_delay.lock().unwrap();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      if self.fail_full_fetches.load(Ordering::SeqCst) {
        return Err(ServiceError::Timeout("fetch timed out".to_string()));
      }
    }

    let matching: Vec<Asset> = self
      .assets
      .lock()
      .unwrap()
      .iter()
      .filter(|asset| {
        query
          .filter()
          .map_or(true, |f| f.terms().iter().all(|t| term_matches(asset, t)))
      })
      .map(|asset| project(asset, query.selection()))
      .collect();

    let total_available = matching.len() as u64;
    let assets = match query.paging() {
      Some(paging) => matching
        .into_iter()
        .skip(paging.start as usize)
        .take(paging.size as usize)
        .collect(),
      None => matching,
    };

    Ok(QueryResult {
      total_available,
      assets,
    })
  }
}
