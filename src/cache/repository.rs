//! Staleness-checked in-memory cache of backlog items.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::backlog::{Backlog, BacklogError, BacklogItem, BacklogQueries};
use crate::config::BacklogConfig;
use crate::v1::{
  format_v1_datetime, parse_v1_datetime, Asset, AssetService, AttributeDefinition, Query,
  QueryResult,
};

use super::traits::CacheResult;

/// Items and the watermark they were loaded with. Always replaced together.
#[derive(Debug, Default)]
struct CacheState {
  items: Backlog,
  /// Latest change date seen in the last reload; `None` means dirty
  watermark: Option<NaiveDateTime>,
  loaded_at: Option<DateTime<Utc>>,
}

/// Cache of the backlog items in one scope.
///
/// Refreshes lazily: a read first asks the server whether anything in scope
/// changed after the watermark, and only then reloads the whole set.
pub struct BacklogRepository<S: AssetService> {
  service: S,
  queries: BacklogQueries,
  query_for_my_backlog_items: Query,
  state: RwLock<CacheState>,
  /// Serializes reloads so at most one is in flight
  reload_guard: tokio::sync::Mutex<()>,
}

impl<S: AssetService> BacklogRepository<S> {
  /// Resolve the schema and build the backlog query. The cache starts dirty.
  pub async fn new(service: S, config: &BacklogConfig) -> Result<Self, BacklogError> {
    let queries = BacklogQueries::resolve(&service, config).await?;
    let query_for_my_backlog_items = queries.build_query_for_my_backlog_items();
    debug!(
      scope = queries.scope(),
      query = %query_for_my_backlog_items.fingerprint(),
      "built backlog query"
    );

    Ok(Self {
      service,
      queries,
      query_for_my_backlog_items,
      state: RwLock::new(CacheState::default()),
      reload_guard: tokio::sync::Mutex::new(()),
    })
  }

  pub fn scope(&self) -> &str {
    self.queries.scope()
  }

  /// The query used for every reload.
  #[allow(dead_code)]
  pub fn full_query(&self) -> &Query {
    &self.query_for_my_backlog_items
  }

  pub fn watermark(&self) -> Option<NaiveDateTime> {
    self.read_state().watermark
  }

  pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
    self.read_state().loaded_at
  }

  fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
    // Writers only ever assign a fully built state, so a poisoned lock still
    // holds a consistent value
    self
      .state
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn snapshot(&self) -> (Backlog, Option<DateTime<Utc>>) {
    let state = self.read_state();
    (Arc::clone(&state.items), state.loaded_at)
  }

  /// Whether the server has changes newer than the cached data.
  ///
  /// Always true before the first successful reload (no remote call). After
  /// that, runs a count-only probe for items in scope changed after the
  /// watermark.
  pub async fn is_stale(&self) -> Result<bool, BacklogError> {
    let Some(watermark) = self.watermark() else {
      debug!(scope = self.scope(), "no watermark, cache is dirty");
      return Ok(true);
    };

    let probe = self.queries.build_changed_since(watermark);
    let result = self.service.retrieve(&probe).await?;
    debug!(
      scope = self.scope(),
      query = %probe.fingerprint(),
      watermark = %format_v1_datetime(watermark),
      changed = result.total_available,
      "staleness probe"
    );
    Ok(result.total_available > 0)
  }

  /// Fetch every item in scope and replace the cache.
  ///
  /// On failure the previous items and watermark are kept.
  #[allow(dead_code)]
  pub async fn reload(&self) -> Result<(), BacklogError> {
    let _guard = self.reload_guard.lock().await;
    self.reload_locked().await
  }

  async fn reload_locked(&self) -> Result<(), BacklogError> {
    let result = self
      .service
      .retrieve(&self.query_for_my_backlog_items)
      .await?;
    let (items, watermark) = self.build_items(result)?;
    let count = items.len();

    let previous = {
      let mut state = self
        .state
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      let previous = state.watermark;
      *state = CacheState {
        items: Arc::new(items),
        watermark,
        loaded_at: Some(Utc::now()),
      };
      previous
    };

    info!(
      scope = self.scope(),
      query = %self.query_for_my_backlog_items.fingerprint(),
      items = count,
      previous_watermark = ?previous.map(format_v1_datetime),
      watermark = ?watermark.map(format_v1_datetime),
      "reloaded backlog"
    );
    if watermark.is_none() {
      warn!(
        scope = self.scope(),
        "reload returned no items; cache stays dirty until items appear"
      );
    }
    Ok(())
  }

  /// Build the replacement map and its watermark from a full result.
  fn build_items(
    &self,
    result: QueryResult,
  ) -> Result<(HashMap<String, BacklogItem>, Option<NaiveDateTime>), BacklogError> {
    let mut items = HashMap::with_capacity(result.assets.len());
    let mut watermark: Option<NaiveDateTime> = None;

    for asset in &result.assets {
      let number = self.required(asset, self.queries.number())?;
      let name = self.required(asset, self.queries.name())?;
      let tag = self
        .queries
        .tag()
        .and_then(|tag| asset.text(tag))
        .filter(|t| !t.is_empty());

      let changed = self
        .required(asset, self.queries.change())
        .and_then(|raw| {
          parse_v1_datetime(&raw).ok_or_else(|| BacklogError::DataIntegrity {
            oid: asset.oid().to_string(),
            attribute: self.queries.change().token(),
          })
        })?;
      // Remember the most recent change for the staleness probe
      if watermark.map_or(true, |w| changed > w) {
        watermark = Some(changed);
      }

      let item = BacklogItem {
        number: number.clone(),
        name,
        tag,
      };
      if items.insert(number.clone(), item).is_some() {
        warn!(number = %number, "duplicate item number in one reload, keeping the last");
      }
    }

    Ok((items, watermark))
  }

  fn required(
    &self,
    asset: &Asset,
    attribute: &AttributeDefinition,
  ) -> Result<String, BacklogError> {
    asset
      .text(attribute)
      .ok_or_else(|| BacklogError::DataIntegrity {
        oid: asset.oid().to_string(),
        attribute: attribute.token(),
      })
  }

  /// Current items, reloading first if the server has newer changes.
  #[allow(dead_code)]
  pub async fn retrieve_current(&self) -> Result<Backlog, BacklogError> {
    Ok(self.retrieve_current_with_source().await?.data)
  }

  /// Like [`retrieve_current`](Self::retrieve_current), with where the data came from.
  ///
  /// If the probe or reload fails for remote reasons and an earlier load
  /// exists, that snapshot is served as `Offline` with the error attached.
  pub async fn retrieve_current_with_source(
    &self,
  ) -> Result<CacheResult<Backlog>, BacklogError> {
    let _guard = self.reload_guard.lock().await;

    match self.refresh_if_stale().await {
      Ok(true) => {
        let (items, loaded_at) = self.snapshot();
        Ok(CacheResult::from_network(items, loaded_at))
      }
      Ok(false) => {
        let (items, loaded_at) = self.snapshot();
        Ok(CacheResult::from_cache(items, loaded_at))
      }
      Err(e) if e.is_remote() && self.loaded_at().is_some() => {
        let (items, loaded_at) = self.snapshot();
        warn!(
          scope = self.scope(),
          error = %e,
          items = items.len(),
          "refresh failed, serving previous snapshot"
        );
        Ok(CacheResult::offline(items, loaded_at, e))
      }
      Err(e) => Err(e),
    }
  }

  async fn refresh_if_stale(&self) -> Result<bool, BacklogError> {
    if self.is_stale().await? {
      self.reload_locked().await?;
      Ok(true)
    } else {
      Ok(false)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::v1::fake::{workitem, FakeAssetService};
  use pretty_assertions::assert_eq;
  use serde_json::Value;
  use std::time::Duration;

  type Repository = BacklogRepository<Arc<FakeAssetService>>;

  async fn repository(service: &Arc<FakeAssetService>) -> Repository {
    BacklogRepository::new(Arc::clone(service), &BacklogConfig::for_scope("CallCenter"))
      .await
      .unwrap()
  }

  fn ts(value: &str) -> NaiveDateTime {
    parse_v1_datetime(value).unwrap()
  }

  fn item(number: &str, name: &str, tag: Option<&str>) -> BacklogItem {
    BacklogItem {
      number: number.to_string(),
      name: name.to_string(),
      tag: tag.map(String::from),
    }
  }

  #[tokio::test]
  async fn test_new_repository_is_dirty() {
    let service = Arc::new(FakeAssetService::backlog());
    let repository = repository(&service).await;

    assert!(repository.is_stale().await.unwrap());
    assert_eq!(repository.watermark(), None);
    assert_eq!(repository.loaded_at(), None);
    // Never-loaded needs no probe
    assert_eq!(service.probe_count(), 0);
  }

  #[tokio::test]
  async fn test_reload_is_clean() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-01001", "Login page", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;

    repository.reload().await.unwrap();

    assert!(!repository.is_stale().await.unwrap());
    assert_eq!(service.probe_count(), 1);
    assert!(repository.loaded_at().is_some());
  }

  #[tokio::test]
  async fn test_watermark_is_maximum_change_date() {
    for changes in [
      ["2023-01-01T00:00:00.000", "2023-01-02T00:00:00.000"],
      ["2023-01-02T00:00:00.000", "2023-01-01T00:00:00.000"],
    ] {
      let service = Arc::new(FakeAssetService::backlog());
      service.push(workitem("B-1", "First", None, changes[0], "CallCenter"));
      service.push(workitem("B-2", "Second", None, changes[1], "CallCenter"));
      let repository = repository(&service).await;

      repository.reload().await.unwrap();

      assert_eq!(repository.watermark(), Some(ts("2023-01-02T00:00:00.000")));
    }
  }

  #[tokio::test]
  async fn test_missing_tag_is_none() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Untagged", None, "2023-01-01T00:00:00.000", "CallCenter"));
    service.push(workitem("B-2", "Tagged", Some("urgent"), "2023-01-01T00:00:00.000", "CallCenter"));
    service.push(
      workitem("B-3", "Blank tag", None, "2023-01-01T00:00:00.000", "CallCenter")
        .with("Custom_Tags2", ""),
    );
    let repository = repository(&service).await;

    let backlog = repository.retrieve_current().await.unwrap();

    assert_eq!(backlog["B-1"].tag, None);
    assert_eq!(backlog["B-2"].tag.as_deref(), Some("urgent"));
    assert_eq!(backlog["B-3"].tag, None);
  }

  #[tokio::test]
  async fn test_tag_is_none_when_not_selected() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Tagged", Some("urgent"), "2023-01-01T00:00:00.000", "CallCenter"));
    let config = BacklogConfig {
      tag_attribute: None,
      ..BacklogConfig::for_scope("CallCenter")
    };
    let repository = BacklogRepository::new(Arc::clone(&service), &config)
      .await
      .unwrap();

    let backlog = repository.retrieve_current().await.unwrap();

    assert_eq!(backlog["B-1"], item("B-1", "Tagged", None));
  }

  #[tokio::test]
  async fn test_retrieve_my_backlog() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-01019", "Sample story", None, "2023-06-01T12:00:00.000", "CallCenter"));
    let repository = repository(&service).await;

    let backlog = repository.retrieve_current().await.unwrap();

    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog["B-01019"], item("B-01019", "Sample story", None));
    assert_eq!(repository.watermark(), Some(ts("2023-06-01T12:00:00.000")));
  }

  #[tokio::test]
  async fn test_items_outside_scope_are_ignored() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Ours", None, "2023-01-01T00:00:00.000", "CallCenter"));
    service.push(workitem("B-2", "Theirs", None, "2023-01-01T00:00:00.000", "Payments"));
    let repository = repository(&service).await;

    let backlog = repository.retrieve_current().await.unwrap();
    assert_eq!(backlog.keys().collect::<Vec<_>>(), vec!["B-1"]);

    // A change in another scope does not make this cache stale
    service.push(workitem("B-3", "Theirs too", None, "2023-02-01T00:00:00.000", "Payments"));
    assert!(!repository.is_stale().await.unwrap());
  }

  #[tokio::test]
  async fn test_newer_change_triggers_reload() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Old name", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    repository.retrieve_current().await.unwrap();

    service.set_assets(vec![
      workitem("B-1", "New name", None, "2023-01-03T08:30:00.125", "CallCenter"),
      workitem("B-2", "Added", Some("ui"), "2023-01-02T00:00:00.000", "CallCenter"),
    ]);
    assert!(repository.is_stale().await.unwrap());

    let result = repository.retrieve_current_with_source().await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data["B-1"].name, "New name");
    assert_eq!(result.data.len(), 2);
    assert_eq!(repository.watermark(), Some(ts("2023-01-03T08:30:00.125")));
    assert_eq!(service.full_fetch_count(), 2);
  }

  #[tokio::test]
  async fn test_fresh_cache_is_served_without_reload() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Stable", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;

    let first = repository.retrieve_current_with_source().await.unwrap();
    let second = repository.retrieve_current_with_source().await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert!(Arc::ptr_eq(&first.data, &second.data));
    assert_eq!(service.full_fetch_count(), 1);
  }

  #[tokio::test]
  async fn test_change_at_watermark_is_not_stale() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "One", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    repository.reload().await.unwrap();

    // Same timestamp as the watermark: the probe is strictly greater-than
    service.push(workitem("B-2", "Two", None, "2023-01-01T00:00:00.000", "CallCenter"));
    assert!(!repository.is_stale().await.unwrap());
  }

  #[tokio::test]
  async fn test_sub_millisecond_change_date_is_clean_after_reload() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Precise", None, "2023-01-01T00:00:00.1234567", "CallCenter"));
    let repository = repository(&service).await;

    repository.reload().await.unwrap();
    assert!(!repository.is_stale().await.unwrap());

    repository.retrieve_current().await.unwrap();
    repository.retrieve_current().await.unwrap();
    assert_eq!(service.full_fetch_count(), 1);

    // A change in the following millisecond is still seen
    service.push(workitem("B-2", "Later", None, "2023-01-01T00:00:00.125", "CallCenter"));
    assert!(repository.is_stale().await.unwrap());
  }

  #[tokio::test]
  async fn test_duplicate_number_last_wins() {
    let service = Arc::new(FakeAssetService::backlog());
    service.set_assets(vec![
      workitem("B-1", "First copy", None, "2023-01-01T00:00:00.000", "CallCenter"),
      workitem("B-1", "Second copy", Some("dup"), "2023-01-02T00:00:00.000", "CallCenter"),
    ]);
    let repository = repository(&service).await;

    let backlog = repository.retrieve_current().await.unwrap();

    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog["B-1"], item("B-1", "Second copy", Some("dup")));
    assert_eq!(repository.watermark(), Some(ts("2023-01-02T00:00:00.000")));
  }

  #[tokio::test]
  async fn test_reload_replaces_items() {
    let service = Arc::new(FakeAssetService::backlog());
    service.set_assets(vec![
      workitem("B-1", "Kept", None, "2023-01-01T00:00:00.000", "CallCenter"),
      workitem("B-2", "Deleted later", None, "2023-01-02T00:00:00.000", "CallCenter"),
    ]);
    let repository = repository(&service).await;
    let before = repository.retrieve_current().await.unwrap();

    service.set_assets(vec![workitem("B-1", "Kept", None, "2023-01-01T00:00:00.000", "CallCenter")]);
    repository.reload().await.unwrap();
    let after = repository.retrieve_current().await.unwrap();

    assert_eq!(after.len(), 1);
    assert!(!after.contains_key("B-2"));
    // Earlier snapshots are unaffected
    assert_eq!(before.len(), 2);
    // Watermark follows the fresh maximum even when it moves backwards
    assert_eq!(repository.watermark(), Some(ts("2023-01-01T00:00:00.000")));
  }

  #[tokio::test]
  async fn test_failed_fetch_keeps_previous_snapshot() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Original", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    let before = repository.retrieve_current().await.unwrap();
    let watermark = repository.watermark();

    service.set_assets(vec![
      workitem("B-1", "Renamed", None, "2023-01-05T00:00:00.000", "CallCenter"),
      workitem("B-2", "New", None, "2023-01-05T00:00:00.000", "CallCenter"),
    ]);
    service.fail_full_fetches(true);

    let result = repository.retrieve_current_with_source().await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert!(matches!(result.error, Some(BacklogError::Timeout(_))));
    assert_eq!(*result.data, *before);
    assert_eq!(repository.watermark(), watermark);
    assert!(repository.is_stale().await.unwrap());

    let current = repository.retrieve_current().await.unwrap();
    assert_eq!(current["B-1"].name, "Original");

    service.fail_full_fetches(false);
    let current = repository.retrieve_current().await.unwrap();
    assert_eq!(current["B-1"].name, "Renamed");
    assert_eq!(current.len(), 2);
  }

  #[tokio::test]
  async fn test_failed_probe_serves_previous_snapshot() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Original", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    repository.retrieve_current().await.unwrap();

    service.fail_probes(true);

    let result = repository.retrieve_current_with_source().await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert!(matches!(result.error, Some(BacklogError::RemoteUnavailable(_))));
    assert_eq!(result.data["B-1"].name, "Original");
    // The probe itself propagates its failure
    assert!(matches!(
      repository.is_stale().await,
      Err(BacklogError::RemoteUnavailable(_))
    ));
  }

  #[tokio::test]
  async fn test_failure_before_first_load_propagates() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Unreachable", None, "2023-01-01T00:00:00.000", "CallCenter"));
    service.fail_full_fetches(true);
    let repository = repository(&service).await;

    let result = repository.retrieve_current().await;

    assert!(matches!(result, Err(BacklogError::Timeout(_))));
    assert_eq!(repository.watermark(), None);
    assert!(matches!(
      repository.reload().await,
      Err(BacklogError::Timeout(_))
    ));
  }

  #[tokio::test]
  async fn test_missing_name_is_data_integrity_error() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Good", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    let before = repository.retrieve_current().await.unwrap();

    service.push(
      workitem("B-2", "placeholder", None, "2023-01-02T00:00:00.000", "CallCenter")
        .with("Name", Value::Null),
    );

    let result = repository.retrieve_current().await;
    assert!(matches!(
      result,
      Err(BacklogError::DataIntegrity { ref oid, ref attribute })
        if oid == "Story:B-2" && attribute == "PrimaryWorkitem.Name"
    ));
    assert_eq!(repository.watermark(), Some(ts("2023-01-01T00:00:00.000")));
    let (items, _) = repository.snapshot();
    assert!(Arc::ptr_eq(&items, &before));
  }

  #[tokio::test]
  async fn test_unparseable_change_date_is_data_integrity_error() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Broken", None, "last tuesday", "CallCenter"));
    let repository = repository(&service).await;

    let result = repository.reload().await;

    assert!(matches!(result, Err(BacklogError::DataIntegrity { .. })));
    assert_eq!(repository.watermark(), None);
  }

  #[tokio::test]
  async fn test_empty_reload_stays_dirty() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Gone soon", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    repository.reload().await.unwrap();

    service.set_assets(Vec::new());
    repository.reload().await.unwrap();

    assert!(repository.retrieve_current_with_source().await.unwrap().data.is_empty());
    assert_eq!(repository.watermark(), None);
    assert!(repository.is_stale().await.unwrap());

    // Every read reloads while the watermark is unset
    let fetches = service.full_fetch_count();
    repository.retrieve_current().await.unwrap();
    assert_eq!(service.full_fetch_count(), fetches + 1);
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_reload() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "Shared", None, "2023-01-01T00:00:00.000", "CallCenter"));
    service.set_fetch_delay(Duration::from_millis(50));
    let repository = Arc::new(repository(&service).await);

    let (a, b) = futures::join!(repository.retrieve_current(), repository.retrieve_current());

    assert_eq!(a.unwrap()["B-1"].name, "Shared");
    assert_eq!(b.unwrap()["B-1"].name, "Shared");
    assert_eq!(service.full_fetch_count(), 1);
  }

  #[tokio::test]
  async fn test_unknown_tag_attribute_fails_construction() {
    let service = Arc::new(
      FakeAssetService::new()
        .with_asset_type("PrimaryWorkitem", &["Number", "Name", "ChangeDateUTC", "Scope.ParentMeAndUp.Name"]),
    );
    let result = BacklogRepository::new(service, &BacklogConfig::for_scope("CallCenter")).await;
    assert!(matches!(result, Err(BacklogError::Configuration(_))));
  }

  #[tokio::test]
  async fn test_full_query_is_stable() {
    let service = Arc::new(FakeAssetService::backlog());
    service.push(workitem("B-1", "One", None, "2023-01-01T00:00:00.000", "CallCenter"));
    let repository = repository(&service).await;
    let before = repository.full_query().clone();

    repository.retrieve_current().await.unwrap();
    repository.is_stale().await.unwrap();

    assert_eq!(repository.full_query(), &before);
    assert_eq!(repository.scope(), "CallCenter");
  }
}
