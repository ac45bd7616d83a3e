//! Reqwest-backed client for the replication service's REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::types::{ApiResponse, ConnectionSummary, CreatedConnector, Page};
use crate::config::ApiSettings;
use crate::{Error, Result};

/// Page size requested from listing endpoints.
pub const PAGE_LIMIT: usize = 100;

const MAX_ERROR_BODY: usize = 512;

/// Operations the provisioning flows need from the replication service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectorApi: Send + Sync {
    /// Creates a connector and returns its id.
    async fn create_connector(&self, payload: &Value) -> Result<String>;

    async fn update_connector(&self, connector_id: &str, payload: &Value) -> Result<()>;

    async fn delete_connector(&self, connector_id: &str) -> Result<()>;

    async fn resync_connector(&self, connector_id: &str) -> Result<()>;

    /// Every connection in `group_id`, across all pages.
    async fn list_group_connections(&self, group_id: &str) -> Result<Vec<ConnectionSummary>>;
}

/// [`ConnectorApi`] over HTTPS with basic authentication.
pub struct RestConnectorClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl RestConnectorClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
        })
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |reason: String| {
            Error::Config(format!("invalid API URL '{}': {}", self.base_url, reason))
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no response body").to_string();
    }
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    let envelope: ApiResponse<T> = serde_json::from_value(body)?;
    Ok(envelope.data)
}

#[async_trait]
impl ConnectorApi for RestConnectorClient {
    async fn create_connector(&self, payload: &Value) -> Result<String> {
        let url = self.endpoint(&["connectors"])?;
        let body = self.send(self.request(Method::POST, url).json(payload)).await?;
        let created: CreatedConnector = decode(body)?;
        Ok(created.id)
    }

    async fn update_connector(&self, connector_id: &str, payload: &Value) -> Result<()> {
        let url = self.endpoint(&["connectors", connector_id])?;
        self.send(self.request(Method::PATCH, url).json(payload)).await?;
        Ok(())
    }

    async fn delete_connector(&self, connector_id: &str) -> Result<()> {
        let url = self.endpoint(&["connectors", connector_id])?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn resync_connector(&self, connector_id: &str) -> Result<()> {
        let url = self.endpoint(&["connectors", connector_id, "resync"])?;
        self.send(self.request(Method::POST, url)).await?;
        Ok(())
    }

    async fn list_group_connections(&self, group_id: &str) -> Result<Vec<ConnectionSummary>> {
        let mut connections = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["connections"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("group_id", group_id);
                query.append_pair("limit", &PAGE_LIMIT.to_string());
                if let Some(cursor) = &cursor {
                    query.append_pair("cursor", cursor);
                }
            }

            let page: Page<ConnectionSummary> =
                decode(self.send(self.request(Method::GET, url)).await?)?;
            debug!(group_id = %group_id, "Fetched {} connections", page.items.len());
            connections.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(connections)
    }
}
