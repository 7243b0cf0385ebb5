//! Result metadata for cache reads.

use chrono::{DateTime, Utc};

use crate::backlog::BacklogError;

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was loaded from the server (None if never loaded)
  pub loaded_at: Option<DateTime<Utc>>,
  /// Why a refresh was skipped (offline mode only)
  pub error: Option<BacklogError>,
}

impl<T> CacheResult<T> {
  /// Data that was just reloaded from the server.
  pub fn from_network(data: T, loaded_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      loaded_at,
      error: None,
    }
  }

  /// Data served from memory after a negative staleness probe.
  pub fn from_cache(data: T, loaded_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      loaded_at,
      error: None,
    }
  }

  /// Previously loaded data served because the refresh failed.
  pub fn offline(data: T, loaded_at: Option<DateTime<Utc>>, error: BacklogError) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      loaded_at,
      error: Some(error),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Freshly reloaded from the server
  Network,
  /// Held in memory; the server reported no newer changes
  CacheFresh,
  /// Server unavailable, serving the last successful load
  Offline,
}
