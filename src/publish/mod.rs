//! Durable artifact publishing.
//!
//! Snapshots are uploaded to object storage under
//! `outputs/<sanitized prompt>_<YYYYMMDD-HHMMSS>.png`. With no bucket
//! configured the `NoopPublisher` is used and nothing leaves the host.

mod gcs;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;

use crate::error::Result;

pub use gcs::{GcsConfig, GcsPublisher, TokenSource, content_type_for};

/// Fixed prefix for every published object.
pub const OUTPUT_PREFIX: &str = "outputs/";

/// Longest prompt fragment kept in an object key.
const MAX_SLUG_CHARS: usize = 200;

/// Uploads local files to a durable store.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Whether publishing goes anywhere. Disabled publishers never do I/O.
    fn is_enabled(&self) -> bool;

    /// Upload `local` under `key`. Failures are not retried.
    async fn publish(&self, local: &Path, key: &str) -> Result<()>;
}

/// Publisher used when no destination is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl ArtifactPublisher for NoopPublisher {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn publish(&self, local: &Path, key: &str) -> Result<()> {
        debug!(
            "No export bucket configured, not publishing {} as {}",
            local.display(),
            key
        );
        Ok(())
    }
}

/// Object key for a snapshot of `prompt` taken at `now`.
pub fn object_key(prompt: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}.png",
        OUTPUT_PREFIX,
        slugify_prompt(prompt),
        now.format("%Y%m%d-%H%M%S")
    )
}

/// Make prompt text safe to embed in an object name.
///
/// Spaces and punctuation are kept so the key stays readable; path
/// separators and control characters become `_`.
pub fn slugify_prompt(prompt: &str) -> String {
    let slug: String = prompt
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .take(MAX_SLUG_CHARS)
        .collect();
    let slug = slug.trim().to_string();
    if slug.is_empty() { "untitled".to_string() } else { slug }
}
