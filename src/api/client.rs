//! Drive API client
//!
//! Provides authenticated access to the remote drive for listing, metadata
//! reads and node mutations. All calls go through [`RemoteTransport`] so the
//! batcher can be exercised against a scripted transport in tests.

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::errors::ApiError;
use super::types::NodeMetadata;

/// Drive API base URL
const API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing page size
pub const PAGE_SIZE: u32 = 1000;

/// Node fields requested on every listing and get
const DEFAULT_FIELDS: [&str; 8] = [
    "id",
    "kind",
    "mimeType",
    "name",
    "owners",
    "parents",
    "shortcutDetails",
    "size",
];

/// One logical remote call, as queued into the batcher
#[derive(Debug, Clone)]
pub enum ApiRequest {
    /// `files.list` — one page of a query
    List {
        query: Option<String>,
        page_token: Option<String>,
        extra_fields: Vec<String>,
        /// Include items from shared drives
        shared: bool,
    },
    /// `files.get` for a single id
    Get {
        file_id: String,
        extra_fields: Vec<String>,
    },
    /// `files.create` (folders and shortcuts)
    Create { metadata: NodeMetadata },
    /// `files.copy` with metadata overrides
    Copy {
        file_id: String,
        metadata: NodeMetadata,
    },
    /// `files.delete`
    Delete { file_id: String },
    /// `about.get` (storage quota)
    About,
}

impl ApiRequest {
    /// Whether this request mutates remote state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ApiRequest::Create { .. } | ApiRequest::Copy { .. } | ApiRequest::Delete { .. }
        )
    }
}

/// Build the `fields` selector for a node response
fn node_fields(extra: &[String]) -> String {
    let mut fields: Vec<&str> = DEFAULT_FIELDS.to_vec();
    for field in extra {
        if !fields.contains(&field.as_str()) {
            fields.push(field);
        }
    }
    fields.join(",")
}

/// Executes individual and batched remote calls.
///
/// Implemented by [`DriveClient`] for the real API and by scripted transports
/// in tests.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Rebind the transport to another identity. Queued requests keep flowing;
    /// they execute under whichever identity is bound when their batch runs.
    fn bind_identity(&self, email: &str, token: &str);

    /// Execute a single request
    async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError>;

    /// Execute a bounded group of requests as one batched round trip.
    /// `Err` at this level means the whole batch failed in transport;
    /// otherwise each item resolves or fails independently.
    async fn execute_batch(&self, requests: &[ApiRequest]) -> Result<Vec<Result<Value, ApiError>>, ApiError>;
}

/// Auth state, rebindable on identity switch (interior mutability)
struct AuthState {
    email: String,
    token: String,
}

/// Drive API client for making authenticated requests
pub struct DriveClient {
    http: Client,
    auth: RwLock<AuthState>,
}

impl DriveClient {
    /// Create a client bound to the given identity
    pub fn new(email: &str, token: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            auth: RwLock::new(AuthState {
                email: email.to_string(),
                token: token.to_string(),
            }),
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.auth.read().unwrap().token)
    }

    /// Email of the currently bound identity
    pub fn email(&self) -> String {
        self.auth.read().unwrap().email.clone()
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = request.header("Authorization", self.bearer()).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            // files.delete answers 204 with no body
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ApiError::Network(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl RemoteTransport for DriveClient {
    fn bind_identity(&self, email: &str, token: &str) {
        let mut auth = self.auth.write().unwrap();
        auth.email = email.to_string();
        auth.token = token.to_string();
        debug!(email = email, "Rebound transport identity");
    }

    async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        match request {
            ApiRequest::List {
                query,
                page_token,
                extra_fields,
                shared,
            } => {
                let shared = if *shared { "true" } else { "false" };
                let fields = format!("files({}),nextPageToken", node_fields(extra_fields));
                let mut req = self
                    .http
                    .get(format!("{}/files", API_BASE))
                    .query(&[
                        ("pageSize", PAGE_SIZE.to_string().as_str()),
                        ("fields", &fields),
                        ("supportsAllDrives", shared),
                        ("includeItemsFromAllDrives", shared),
                    ]);
                if let Some(query) = query {
                    req = req.query(&[("q", query)]);
                }
                if let Some(token) = page_token {
                    req = req.query(&[("pageToken", token)]);
                }
                self.send(req).await
            }
            ApiRequest::Get {
                file_id,
                extra_fields,
            } => {
                let req = self
                    .http
                    .get(format!("{}/files/{}", API_BASE, file_id))
                    .query(&[("fields", node_fields(extra_fields))]);
                self.send(req).await
            }
            ApiRequest::Create { metadata } => {
                let req = self
                    .http
                    .post(format!("{}/files", API_BASE))
                    .query(&[("fields", node_fields(&[]))])
                    .json(metadata);
                self.send(req).await
            }
            ApiRequest::Copy { file_id, metadata } => {
                let req = self
                    .http
                    .post(format!("{}/files/{}/copy", API_BASE, file_id))
                    .query(&[("fields", node_fields(&[]))])
                    .json(metadata);
                self.send(req).await
            }
            ApiRequest::Delete { file_id } => {
                let req = self.http.delete(format!("{}/files/{}", API_BASE, file_id));
                self.send(req).await
            }
            ApiRequest::About => {
                let req = self
                    .http
                    .get(format!("{}/about", API_BASE))
                    .query(&[("fields", "storageQuota")]);
                self.send(req).await
            }
        }
    }

    async fn execute_batch(&self, requests: &[ApiRequest]) -> Result<Vec<Result<Value, ApiError>>, ApiError> {
        // One round trip per batch on the wire; the items share the pooled
        // connection and complete independently.
        debug!(count = requests.len(), "Executing request batch");
        Ok(join_all(requests.iter().map(|r| self.execute(r))).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_fields_deduplicates_extras() {
        let fields = node_fields(&["createdTime".to_string(), "size".to_string()]);
        assert!(fields.contains("createdTime"));
        assert_eq!(fields.matches("size").count(), 1);
    }

    #[test]
    fn test_mutation_classification() {
        assert!(ApiRequest::Delete {
            file_id: "x".to_string()
        }
        .is_mutation());
        assert!(!ApiRequest::About.is_mutation());
        assert!(!ApiRequest::Get {
            file_id: "x".to_string(),
            extra_fields: vec![]
        }
        .is_mutation());
    }
}
