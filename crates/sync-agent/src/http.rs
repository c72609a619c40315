//! `DaemonApi` over the Syncthing REST API, using reqwest.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use sync_core::api::{
    ApiError, Connections, DaemonApi, DaemonEvent, DeviceConfig, EventQuery, FileInfo,
    FileVersion, FolderConfig, FolderStats, Result, SystemStatus,
};
use sync_core::{BridgeConfig, TtlCache};
use tracing::debug;

/// Header carrying the daemon's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Client-side timeout; must exceed the longest event long-poll.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// How long the folder list from `/rest/config` is reused.
pub const CONFIG_TTL: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct DaemonConfig {
    #[serde(default)]
    folders: Vec<FolderConfig>,
}

#[derive(Deserialize)]
struct IgnoreList {
    #[serde(default)]
    ignore: Option<Vec<String>>,
}

/// HTTP client for one daemon instance.
pub struct HttpDaemonClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    folders: TtlCache<Vec<FolderConfig>>,
}

impl HttpDaemonClient {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Self::with_base_url(config.api_url(), config.api_key.clone())
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            folders: TtlCache::new(CONFIG_TTL),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Drop the cached folder list so the next `folders()` refetches it.
    pub fn invalidate_config(&self) {
        self.folders.invalidate();
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, endpoint))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        debug!("Daemon request: {}", endpoint);
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("{}: {}", endpoint, e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(endpoint.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ApiError::Unauthorized(endpoint.to_string()))
            }
            status => Err(ApiError::Http {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .send(endpoint, self.request(Method::GET, endpoint).query(query))
            .await?;
        response.json().await.map_err(|e| ApiError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl DaemonApi for HttpDaemonClient {
    fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn status(&self) -> Result<SystemStatus> {
        self.get_json("/rest/system/status", &[]).await
    }

    async fn connections(&self) -> Result<Connections> {
        self.get_json("/rest/system/connections", &[]).await
    }

    async fn devices(&self) -> Result<Vec<DeviceConfig>> {
        self.get_json("/rest/config/devices", &[]).await
    }

    async fn folders(&self) -> Result<Vec<FolderConfig>> {
        if let Some(folders) = self.folders.get() {
            return Ok(folders);
        }
        let config: DaemonConfig = self.get_json("/rest/config", &[]).await?;
        self.folders.put(config.folders.clone());
        Ok(config.folders)
    }

    async fn folder_stats(&self, folder: &str) -> Result<FolderStats> {
        self.get_json("/rest/db/status", &[("folder", folder.to_string())])
            .await
    }

    async fn force_scan(&self, folder: &str, sub_path: Option<&str>) -> Result<()> {
        let endpoint = "/rest/db/scan";
        let mut query = vec![("folder", folder.to_string())];
        if let Some(sub) = sub_path {
            query.push(("sub", sub.to_string()));
        }
        self.send(endpoint, self.request(Method::POST, endpoint).query(&query))
            .await?;
        Ok(())
    }

    async fn file_info(&self, folder: &str, path: &str) -> Result<FileInfo> {
        let endpoint = "/rest/db/file";
        let query = [("folder", folder.to_string()), ("file", path.to_string())];
        match self.get_json(endpoint, &query).await {
            Err(ApiError::NotFound(_)) => Err(ApiError::NotFound(path.to_string())),
            other => other,
        }
    }

    async fn events(&self, query: &EventQuery) -> Result<Vec<DaemonEvent>> {
        let mut params = Vec::new();
        if let Some(since) = query.since {
            params.push(("since", since.to_string()));
        }
        if let Some(timeout) = query.timeout_secs {
            params.push(("timeout", timeout.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if !query.types.is_empty() {
            params.push(("events", query.types.join(",")));
        }
        self.get_json("/rest/events", &params).await
    }

    async fn ignores(&self, folder: &str) -> Result<Vec<String>> {
        let list: IgnoreList = self
            .get_json("/rest/db/ignores", &[("folder", folder.to_string())])
            .await?;
        Ok(list.ignore.unwrap_or_default())
    }

    async fn set_ignores(&self, folder: &str, rules: &[String]) -> Result<()> {
        let endpoint = "/rest/db/ignores";
        let request = self
            .request(Method::POST, endpoint)
            .query(&[("folder", folder)])
            .json(&json!({ "ignore": rules }));
        self.send(endpoint, request).await?;
        Ok(())
    }

    async fn set_folder_paused(&self, folder: &str, paused: bool) -> Result<()> {
        let endpoint = format!("/rest/config/folders/{}", folder);
        let request = self
            .request(Method::PATCH, &endpoint)
            .json(&json!({ "paused": paused }));
        self.send(&endpoint, request).await?;
        self.folders.invalidate();
        Ok(())
    }

    async fn folder_versions(&self, folder: &str) -> Result<HashMap<String, Vec<FileVersion>>> {
        self.get_json("/rest/folder/versions", &[("folder", folder.to_string())])
            .await
    }

    async fn restore_versions(
        &self,
        folder: &str,
        selections: &HashMap<String, DateTime<FixedOffset>>,
    ) -> Result<()> {
        let endpoint = "/rest/folder/versions";
        let request = self
            .request(Method::POST, endpoint)
            .query(&[("folder", folder)])
            .json(selections);
        self.send(endpoint, request).await?;
        Ok(())
    }
}
