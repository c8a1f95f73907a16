//! Configuration module
//!
//! Client configuration for talking to the backend: endpoints, credentials and the
//! tunables of the upload session. Values come from the environment (and `.env`).

use std::env;

// Common constants
const DEFAULT_BACKEND_URL: &str = "http://localhost:3003";
const DEFAULT_MIME_TYPE: &str = "application/pdf";
const HTTP_TIMEOUT_SECS: u64 = 60;
const UPLOAD_CHUNK_SIZE_KB: usize = 64;
const EVENT_BUFFER: usize = 256;
const REPROCESS_MAX_CONCURRENT: usize = 4;

/// Backend client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL for GraphQL calls (server side)
    pub backend_url: String,
    /// Base URL reachable by the uploading client (transfer and SSE endpoints)
    pub backend_public_url: String,
    pub api_key: String,
    /// Optional user token forwarded as `x-user-jwt`
    pub user_jwt: Option<String>,
    /// Optional workspace scope forwarded as `x-workspace-id`
    pub workspace_id: Option<String>,
    pub http_timeout_secs: u64,
    pub default_mime_type: String,
    pub upload_chunk_size_bytes: usize,
    pub event_buffer: usize,
    pub reprocess_max_concurrent: usize,
    pub environment: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let backend_url = env::var("SHELF_BACKEND_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let backend_public_url = env::var("SHELF_BACKEND_PUBLIC_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| backend_url.clone());

        let config = ClientConfig {
            backend_url,
            backend_public_url,
            api_key: env::var("SHELF_API_KEY")
                .map_err(|_| anyhow::anyhow!("SHELF_API_KEY must be set"))?,
            user_jwt: env::var("SHELF_USER_JWT").ok().filter(|s| !s.is_empty()),
            workspace_id: env::var("SHELF_WORKSPACE_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            http_timeout_secs: env::var("SHELF_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| HTTP_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(HTTP_TIMEOUT_SECS),
            default_mime_type: env::var("SHELF_DEFAULT_MIME_TYPE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            upload_chunk_size_bytes: env::var("SHELF_UPLOAD_CHUNK_SIZE_KB")
                .unwrap_or_else(|_| UPLOAD_CHUNK_SIZE_KB.to_string())
                .parse::<usize>()
                .unwrap_or(UPLOAD_CHUNK_SIZE_KB)
                * 1024,
            event_buffer: env::var("SHELF_EVENT_BUFFER")
                .unwrap_or_else(|_| EVENT_BUFFER.to_string())
                .parse()
                .unwrap_or(EVENT_BUFFER),
            reprocess_max_concurrent: env::var("SHELF_REPROCESS_MAX_CONCURRENT")
                .unwrap_or_else(|_| REPROCESS_MAX_CONCURRENT.to_string())
                .parse()
                .unwrap_or(REPROCESS_MAX_CONCURRENT),
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration pointing at `backend_url` with defaults for everything else.
    pub fn new(backend_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let backend_url = backend_url.into().trim_end_matches('/').to_string();
        Self {
            backend_public_url: backend_url.clone(),
            backend_url,
            api_key: api_key.into(),
            user_jwt: None,
            workspace_id: None,
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            default_mime_type: DEFAULT_MIME_TYPE.to_string(),
            upload_chunk_size_bytes: UPLOAD_CHUNK_SIZE_KB * 1024,
            event_buffer: EVENT_BUFFER,
            reprocess_max_concurrent: REPROCESS_MAX_CONCURRENT,
            environment: "development".to_string(),
        }
    }

    /// Check if the client is running against a production backend
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("SHELF_API_KEY must not be empty"));
        }

        for (name, url) in [
            ("SHELF_BACKEND_URL", &self.backend_url),
            ("SHELF_BACKEND_PUBLIC_URL", &self.backend_public_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!("{} must be an http(s) URL", name));
            }
        }

        if self.is_production() && self.backend_public_url.starts_with("http://") {
            tracing::warn!(
                url = %self.backend_public_url,
                "Uploading over plain HTTP in production"
            );
        }

        if self.upload_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("SHELF_UPLOAD_CHUNK_SIZE_KB must be > 0"));
        }

        if self.event_buffer == 0 {
            return Err(anyhow::anyhow!("SHELF_EVENT_BUFFER must be > 0"));
        }

        if self.reprocess_max_concurrent == 0 {
            return Err(anyhow::anyhow!("SHELF_REPROCESS_MAX_CONCURRENT must be > 0"));
        }

        if self.default_mime_type.trim().is_empty() {
            return Err(anyhow::anyhow!("SHELF_DEFAULT_MIME_TYPE must not be empty"));
        }

        Ok(())
    }
}
