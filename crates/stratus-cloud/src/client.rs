//! HTTP/JSON client for the Stratus control-plane API

use crate::backend::StorageBackend;
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::{GridInfo, NodeInfo, VolumeCreate, VolumeDelete, VolumeInfo};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AccountInfo {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Client for one grid's control-plane API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    // Replaced wholesale by refresh_token; reads copy it out before awaiting.
    token: RwLock<String>,
}

impl ApiClient {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Fails if the underlying HTTP client cannot be constructed.
    pub fn new(config: &CloudConfig) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(config.token.clone()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self) -> String {
        self.token.read().clone()
    }

    /// Map a non-success response to a typed error.
    async fn check(resp: reqwest::Response, what: &str) -> CloudResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            404 => Err(CloudError::NotFound(what.to_string())),
            401 | 403 => Err(CloudError::Auth(message)),
            code => Err(CloudError::Api {
                status: code,
                message,
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> CloudResult<T> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let body = Self::check(resp, what).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_json<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> CloudResult<reqwest::Response> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(self.bearer())
            .json(body)
            .send()
            .await?;
        Self::check(resp, what).await
    }
}

#[async_trait]
impl StorageBackend for ApiClient {
    async fn list_volumes(&self, account_id: u64) -> CloudResult<Vec<VolumeInfo>> {
        self.get_json(&format!("/v1/volumes?account_id={account_id}"), "volumes")
            .await
    }

    async fn create_volume(&self, config: &VolumeCreate) -> CloudResult<u64> {
        debug!(name = %config.name, size_gib = config.size_gib, "creating volume");
        let body = self
            .post_json("/v1/volumes", config, "volume")
            .await?
            .text()
            .await?;
        let created: CreatedId = serde_json::from_str(&body)?;
        Ok(created.id)
    }

    async fn delete_volume(&self, config: &VolumeDelete) -> CloudResult<()> {
        let path = format!(
            "/v1/volumes/{}?detach={}&permanent={}",
            config.volume_id, config.detach, config.permanent
        );
        let resp = self
            .http
            .delete(self.url(&path))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        Self::check(resp, &format!("volume {}", config.volume_id)).await?;
        Ok(())
    }

    async fn get_volume(&self, volume_id: u64) -> CloudResult<VolumeInfo> {
        self.get_json(
            &format!("/v1/volumes/{volume_id}"),
            &format!("volume {volume_id}"),
        )
        .await
    }

    async fn attach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()> {
        self.post_json(
            &format!("/v1/volumes/{volume_id}/attach"),
            &serde_json::json!({ "node_id": node_id }),
            &format!("volume {volume_id}"),
        )
        .await?;
        Ok(())
    }

    async fn detach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()> {
        self.post_json(
            &format!("/v1/volumes/{volume_id}/detach"),
            &serde_json::json!({ "node_id": node_id }),
            &format!("volume {volume_id}"),
        )
        .await?;
        Ok(())
    }

    async fn list_nodes(&self, grid_id: u64) -> CloudResult<Vec<NodeInfo>> {
        self.get_json(&format!("/v1/nodes?grid_id={grid_id}"), "nodes")
            .await
    }

    async fn get_node(&self, node_id: u64) -> CloudResult<NodeInfo> {
        self.get_json(&format!("/v1/nodes/{node_id}"), &format!("node {node_id}"))
            .await
    }

    async fn node_by_reference(&self, reference_id: &str) -> CloudResult<NodeInfo> {
        self.get_json(
            &format!("/v1/nodes/by-reference/{reference_id}"),
            &format!("node ref {reference_id}"),
        )
        .await
    }

    async fn account_id(&self, name: &str) -> CloudResult<u64> {
        let accounts: Vec<AccountInfo> = self
            .get_json(&format!("/v1/accounts?name={name}"), "accounts")
            .await?;
        accounts
            .into_iter()
            .find(|a| a.name == name)
            .map(|a| a.id)
            .ok_or_else(|| CloudError::NotFound(format!("account {name}")))
    }

    async fn grid_id(&self, name: &str) -> CloudResult<u64> {
        let grids: Vec<GridInfo> = self.get_json("/v1/grids", "grids").await?;
        grids
            .into_iter()
            .find(|g| g.name == name)
            .map(|g| g.id)
            .ok_or_else(|| CloudError::NotFound(format!("grid {name}")))
    }

    async fn refresh_token(&self) -> CloudResult<()> {
        let body = self
            .post_json("/v1/auth/refresh", &serde_json::json!({}), "token")
            .await?
            .text()
            .await?;
        let refreshed: TokenResponse = serde_json::from_str(&body)?;
        *self.token.write() = refreshed.token;
        debug!("API token refreshed");
        Ok(())
    }
}
