use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::{AuthType, Config, V1Config};
use crate::v1::api_types::{ApiAssetTypeMeta, ApiAssets};
use crate::v1::error::ServiceError;
use crate::v1::meta::{AssetType, AssetTypeMeta, AttributeDefinition};
use crate::v1::query::{Paging, Query};
use crate::v1::service::{Asset, AssetService, QueryResult};

/// Credentials sent with every request.
#[derive(Clone)]
pub enum Auth {
  /// VersionOne access token, sent as a Bearer token.
  Token(String),
  Basic { username: String, password: String },
}

impl Auth {
  fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match self {
      Auth::Token(token) => request.bearer_auth(token),
      Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
    }
  }
}

/// Upper bound on configured retries: initial attempt + 5 retries.
const MAX_RETRIES: u32 = 5;
/// No single backoff sleeps longer than this.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Transport tuning for the client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
  pub timeout: Duration,
  pub max_retries: u32,
  /// First retry waits this long; each further retry doubles it.
  pub retry_base: Duration,
  /// Page size for full retrievals.
  pub page_size: u32,
}

impl Default for ClientSettings {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      max_retries: 3,
      retry_base: Duration::from_millis(500),
      page_size: 500,
    }
  }
}

impl ClientSettings {
  pub fn from_config(config: &V1Config) -> Self {
    Self {
      timeout: Duration::from_secs(config.timeout_secs),
      max_retries: config.max_retries.min(MAX_RETRIES),
      page_size: config.page_size.max(1),
      ..Self::default()
    }
  }

  fn backoff(&self, attempt: u32) -> Duration {
    self
      .retry_base
      .saturating_mul(2u32.saturating_pow(attempt))
      .min(MAX_BACKOFF)
  }
}

/// VersionOne REST client (`meta.v1` and `rest-1.v1/Data`).
#[derive(Clone)]
pub struct V1Client {
  http: reqwest::Client,
  base_url: Url,
  auth: Auth,
  settings: ClientSettings,
  meta_cache: Arc<Mutex<HashMap<String, Arc<AssetTypeMeta>>>>,
}

impl V1Client {
  /// Create a client from configuration, reading secrets from the environment.
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let v1 = &config.versionone;
    let auth = match v1.auth_type {
      AuthType::Token => Auth::Token(Config::get_access_token()?),
      AuthType::Basic => {
        let username = v1.username.clone().ok_or_else(|| {
          color_eyre::eyre::eyre!("versionone.username is required for basic authentication")
        })?;
        Auth::Basic {
          username,
          password: Config::get_password()?,
        }
      }
    };

    Ok(Self::from_parts(
      &v1.url,
      auth,
      ClientSettings::from_config(v1),
    )?)
  }

  pub fn from_parts(
    base_url: &str,
    auth: Auth,
    settings: ClientSettings,
  ) -> Result<Self, ServiceError> {
    // Url::join drops the last path segment unless it ends with a slash
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| ServiceError::InvalidConfig(format!("bad url {}: {}", base_url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(settings.timeout)
      .build()
      .map_err(|e| ServiceError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      auth,
      settings,
      meta_cache: Arc::new(Mutex::new(HashMap::new())),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
    self
      .base_url
      .join(path)
      .map_err(|e| ServiceError::InvalidConfig(format!("bad endpoint {}: {}", path, e)))
  }

  /// GET with retry on transient failures.
  async fn get_json<T: DeserializeOwned>(
    &self,
    url: &Url,
    params: &[(String, String)],
  ) -> Result<T, ServiceError> {
    let mut attempt = 0;
    loop {
      match self.get_json_once(url, params).await {
        Ok(v) => return Ok(v),
        Err(e) if e.is_transient() && attempt < self.settings.max_retries => {
          let backoff = self.settings.backoff(attempt);
          warn!(
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            path = url.path(),
            error = %e,
            "transient error from VersionOne, retrying"
          );
          tokio::time::sleep(backoff).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }

  async fn get_json_once<T: DeserializeOwned>(
    &self,
    url: &Url,
    params: &[(String, String)],
  ) -> Result<T, ServiceError> {
    let request = self
      .http
      .get(url.clone())
      .query(params)
      .header(ACCEPT, "application/json");

    let response = self
      .auth
      .apply(request)
      .send()
      .await
      .map_err(ServiceError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ServiceError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let body = response.bytes().await.map_err(ServiceError::from_reqwest)?;
    serde_json::from_slice(&body).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
  }

  /// Fetch (memoized) meta for one asset type.
  async fn meta(&self, token: &str) -> Result<Arc<AssetTypeMeta>, ServiceError> {
    let cached = self.lock_meta_cache().get(token).cloned();
    if let Some(meta) = cached {
      return Ok(meta);
    }

    let url = self.endpoint(&format!("meta.v1/{}", token))?;
    let api: ApiAssetTypeMeta = match self.get_json(&url, &[]).await {
      Ok(api) => api,
      Err(ServiceError::Status { status: 404, .. }) => {
        return Err(ServiceError::UnknownAssetType(token.to_string()))
      }
      Err(e) => return Err(e),
    };

    let meta = Arc::new(AssetTypeMeta::from(api));
    debug!(
      asset_type = token,
      attributes = meta.attributes.len(),
      "loaded asset type meta"
    );
    self
      .lock_meta_cache()
      .insert(token.to_string(), Arc::clone(&meta));
    Ok(meta)
  }

  fn lock_meta_cache(
    &self,
  ) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AssetTypeMeta>>> {
    // The map is only ever inserted into, so a poisoned guard is still usable
    self
      .meta_cache
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  async fn fetch_page(
    &self,
    url: &Url,
    params: &[(String, String)],
    paging: Paging,
  ) -> Result<ApiAssets, ServiceError> {
    let mut page_params = params.to_vec();
    page_params.push(("page".to_string(), paging.to_string()));
    let page: ApiAssets = self.get_json(url, &page_params).await?;
    debug!(
      path = url.path(),
      total = page.total,
      page_size = page.page_size,
      page_start = page.page_start,
      received = page.assets.len(),
      "fetched page"
    );
    Ok(page)
  }
}

#[async_trait]
impl AssetService for V1Client {
  async fn asset_type(&self, name: &str) -> Result<AssetType, ServiceError> {
    let meta = self.meta(name).await?;
    Ok(AssetType::new(meta.token.clone()))
  }

  async fn attribute(
    &self,
    asset_type: &AssetType,
    name: &str,
  ) -> Result<AttributeDefinition, ServiceError> {
    let unknown = || ServiceError::UnknownAttribute {
      asset_type: asset_type.token().to_string(),
      attribute: name.to_string(),
    };

    // Walk dotted paths through relation attributes
    let segments: Vec<&str> = name.split('.').collect();
    let mut current = asset_type.token().to_string();
    let mut is_multivalue = false;
    let mut leaf_type = String::new();

    for (i, segment) in segments.iter().enumerate() {
      let meta = self.meta(&current).await?;
      let def = meta.attributes.get(*segment).ok_or_else(unknown)?;
      is_multivalue |= def.is_multivalue;
      leaf_type = def.attribute_type.clone();

      if i + 1 < segments.len() {
        current = def.related_asset.clone().ok_or_else(unknown)?;
      }
    }

    Ok(AttributeDefinition::new(
      asset_type,
      name,
      leaf_type,
      is_multivalue,
    ))
  }

  async fn retrieve(&self, query: &Query) -> Result<QueryResult, ServiceError> {
    let url = self.endpoint(&format!("rest-1.v1/Data/{}", query.asset_type().token()))?;
    let params = query.to_params();

    if let Some(paging) = query.paging() {
      let page = self.fetch_page(&url, &params, paging).await?;
      return Ok(QueryResult {
        total_available: page.total,
        assets: page.assets.into_iter().map(Asset::from).collect(),
      });
    }

    let mut assets = Vec::new();
    let mut start = 0u32;
    let total = loop {
      let page = self
        .fetch_page(&url, &params, Paging::new(self.settings.page_size, start))
        .await?;

      let received = page.assets.len();
      let total = page.total;
      assets.extend(page.assets.into_iter().map(Asset::from));

      // Check if we've fetched all assets
      if received == 0 || assets.len() as u64 >= total {
        break total;
      }
      start += received as u32;
    };

    Ok(QueryResult {
      total_available: total,
      assets,
    })
  }
}
