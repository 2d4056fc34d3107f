//! HTTP+JSON remote client.
//!
//! # Example
//!
//! ```rust,no_run
//! use goal_sync::remote::{HttpRemoteClient, HttpRemoteConfig, RemoteClient};
//! use goal_sync::engine::never_synced;
//!
//! # async fn example() -> Result<(), goal_sync::SyncError> {
//! let client = HttpRemoteClient::new(HttpRemoteConfig {
//!     base_url: "http://localhost:5001".into(),
//!     ..Default::default()
//! })?;
//!
//! let changes = client.fetch_changes_since(never_synced()).await?;
//! println!("{} goals changed", changes.goals.len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use super::traits::RemoteClient;
use super::wire::{format_timestamp, ChangeSet, GoalDto};

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL without trailing slash (e.g. "http://localhost:5001")
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpRemoteClient {
    base_url: String,
    client: Client,
}

impl HttpRemoteClient {
    pub fn new(config: HttpRemoteConfig) -> Result<Self, SyncError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| SyncError::Config(format!("invalid API key: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn goals_url(&self) -> String {
        format!("{}/goals", self.base_url)
    }

    fn goal_url(&self, id: Uuid) -> String {
        format!("{}/goals/{}", self.base_url, id)
    }

    /// Map a non-2xx response to `SyncError::Server`, pulling the
    /// `{"error": "..."}` message out of the body when present.
    async fn check_status(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        Err(SyncError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create_goal(&self, goal: &GoalDto) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.goals_url())
            .json(goal)
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!(goal_id = %goal.id, "Created goal on remote");
        Ok(())
    }

    async fn update_goal(&self, goal: &GoalDto) -> Result<(), SyncError> {
        let response = self
            .client
            .put(self.goal_url(goal.id))
            .json(goal)
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!(goal_id = %goal.id, "Updated goal on remote");
        Ok(())
    }

    async fn delete_goal(&self, id: Uuid) -> Result<(), SyncError> {
        let response = self
            .client
            .delete(self.goal_url(id))
            .send()
            .await?;
        Self::check_status(response).await?;
        debug!(goal_id = %id, "Deleted goal on remote");
        Ok(())
    }

    async fn fetch_changes_since(&self, cursor: DateTime<Utc>) -> Result<ChangeSet, SyncError> {
        let response = self
            .client
            .get(format!("{}/sync", self.base_url))
            .query(&[("last_sync_timestamp", format_timestamp(&cursor))])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response.bytes().await?;
        let changes: ChangeSet = serde_json::from_slice(&body)
            .map_err(|e| SyncError::Decoding(format!("malformed /sync response: {}", e)))?;

        debug!(
            cursor = %cursor,
            changed = changes.goals.len(),
            server_timestamp = %changes.server_timestamp,
            "Fetched remote changes"
        );
        Ok(changes)
    }

    fn name(&self) -> &str {
        "http"
    }
}
