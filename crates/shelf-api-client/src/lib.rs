//! HTTP client for the Shelf backend.
//!
//! Provides the GraphQL transport with the backend's header-based auth, domain methods
//! for the library file mutations and queries, the streamed byte transfer used by the
//! uploader, and the enrichment event stream listener.

pub mod api;
pub mod enrichment;
pub mod transfer;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shelf_core::{ClientConfig, UploadError, UploadResult};
use std::time::Duration;

/// Header forwarding the end user's token.
pub const USER_JWT_HEADER: &str = "x-user-jwt";

/// Header scoping a request to a workspace.
pub const WORKSPACE_ID_HEADER: &str = "x-workspace-id";

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Credentials sent with every backend request.
#[derive(Clone, Debug)]
pub struct Auth {
    /// Sent as `Authorization: ApiKey {key}`
    pub api_key: String,
    pub user_jwt: Option<String>,
    pub workspace_id: Option<String>,
}

impl Auth {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: key.into(),
            user_jwt: None,
            workspace_id: None,
        }
    }

    pub fn authorization(&self) -> String {
        format!("ApiKey {}", self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// HTTP client for the Shelf backend.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    /// No overall timeout; used for transfers and event streams
    stream_client: Client,
    backend_url: String,
    public_url: String,
    auth: Auth,
}

impl ApiClient {
    pub fn new(
        backend_url: String,
        public_url: String,
        auth: Auth,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create streaming HTTP client")?;

        Ok(Self {
            client,
            stream_client,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let auth = Auth {
            api_key: config.api_key.clone(),
            user_jwt: config.user_jwt.clone(),
            workspace_id: config.workspace_id.clone(),
        };
        Self::new(
            config.backend_url.clone(),
            config.backend_public_url.clone(),
            auth,
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Create client from environment, see [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let config = ClientConfig::from_env()?;
        Self::from_config(&config)
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.backend_url, path)
    }

    pub fn build_public_url(&self, path: &str) -> String {
        format!("{}{}", self.public_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request.header(reqwest::header::AUTHORIZATION, self.auth.authorization());
        if let Some(jwt) = &self.auth.user_jwt {
            request = request.header(USER_JWT_HEADER, jwt.as_str());
        }
        if let Some(workspace_id) = &self.auth.workspace_id {
            request = request.header(WORKSPACE_ID_HEADER, workspace_id.as_str());
        }
        request
    }

    /// Execute a GraphQL operation and deserialize its `data` payload.
    ///
    /// Connection failures map to [`UploadError::BackendUnreachable`]. GraphQL errors are
    /// joined with newlines into one [`UploadError::Backend`].
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> UploadResult<T> {
        let url = self.build_url("/graphql");
        let body = serde_json::json!({ "query": query, "variables": variables });
        let request = self.apply_auth(self.client.post(&url).json(&body));

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| UploadError::BackendUnreachable(e.to_string()))?;

        let parsed = serde_json::from_str::<GraphQlResponse<T>>(&text);
        match parsed {
            Ok(body) if !body.errors.is_empty() => Err(UploadError::Backend(join_errors(&body.errors))),
            Ok(body) if status.is_success() => body
                .data
                .ok_or_else(|| UploadError::Backend("Empty response from backend".to_string())),
            Ok(_) => Err(status_error(status, &text)),
            Err(_) if !status.is_success() => Err(status_error(status, &text)),
            Err(e) => Err(e.into()),
        }
    }

    /// Raw client for custom requests. Caller must apply auth.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn join_errors(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_error(status: StatusCode, text: &str) -> UploadError {
    let error_text = if text.is_empty() { "Unknown error" } else { text };
    UploadError::Backend(format!(
        "API request failed with status {}: {}",
        status, error_text
    ))
}

pub use enrichment::{SseEvent, SseParser};
pub use shelf_core::models::{LibraryFile, LibraryFilesPage};
