//! Google Cloud Storage publisher using the JSON API media upload.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde::Deserialize;

use super::ArtifactPublisher;
use crate::error::{GenserveError, Result};

/// Public GCS API endpoint
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// GCE/Vertex metadata server token URL for the default service account
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where the bearer token for uploads comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A fixed access token
    Static(String),
    /// Fetched from a metadata server on every upload
    Metadata { url: String },
}

impl TokenSource {
    /// `GCS_ACCESS_TOKEN` if set, otherwise the metadata server.
    pub fn from_env() -> Self {
        match std::env::var("GCS_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => TokenSource::Static(token),
            _ => TokenSource::Metadata {
                url: METADATA_TOKEN_URL.to_string(),
            },
        }
    }
}

/// Configuration for the GCS publisher
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    pub endpoint: String,
    pub token: TokenSource,
    pub timeout: Duration,
}

impl GcsConfig {
    /// Config for `bucket` against the public endpoint.
    pub fn new(bucket: impl Into<String>, token: TokenSource) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: GCS_ENDPOINT.to_string(),
            token,
            timeout: Duration::from_secs(300),
        }
    }

    /// Point uploads at a different API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Uploads snapshots to a GCS bucket.
pub struct GcsPublisher {
    client: Client,
    config: GcsConfig,
}

impl GcsPublisher {
    pub fn new(config: GcsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenserveError::Publish(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        )
    }

    async fn access_token(&self) -> Result<String> {
        match &self.config.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata { url } => {
                let response = self
                    .client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| GenserveError::Publish(format!("Metadata token request failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(GenserveError::Publish(format!(
                        "Metadata server returned {}",
                        status
                    )));
                }

                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|e| GenserveError::Publish(format!("Failed to parse metadata token: {}", e)))?;
                Ok(token.access_token)
            }
        }
    }
}

#[async_trait]
impl ArtifactPublisher for GcsPublisher {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn publish(&self, local: &Path, key: &str) -> Result<()> {
        let bytes = tokio::fs::read(local).await.map_err(|e| {
            GenserveError::Publish(format!("Failed to read {}: {}", local.display(), e))
        })?;
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header("content-type", content_type_for(local))
            .body(bytes)
            .send()
            .await
            .map_err(|e| GenserveError::Publish(format!("Upload request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenserveError::Publish(format!(
                "Upload to gs://{}/{} failed with {}: {}",
                self.config.bucket, key, status, error_body
            )));
        }

        info!(
            "File {} uploaded to gs://{}/{}",
            local.display(),
            self.config.bucket,
            key
        );
        Ok(())
    }
}

/// Media type for an artifact, by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
