//! Remote image metadata enrichment (best effort).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::model::RemoteMetadata;
use crate::registry::LibraryHelper;

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Who last pushed `image:tag` and when, if the backing service knows.
    /// `Ok(None)` is the normal answer for images it does not cover.
    async fn fetch(&self, image: &str, tag: &str) -> Result<Option<RemoteMetadata>>;
}

#[derive(Deserialize)]
struct HubTagResponse {
    last_updater_username: String,
    last_updated: DateTime<Utc>,
}

/// Fetches uploader/time metadata from hub.docker.com. Only covers images
/// hosted on Docker Hub; everything else resolves to `None`.
pub struct DockerHubMetadataFetcher {
    http: reqwest::Client,
    library: Arc<LibraryHelper>,
}

impl DockerHubMetadataFetcher {
    pub fn new(http: reqwest::Client, library: Arc<LibraryHelper>) -> Self {
        DockerHubMetadataFetcher { http, library }
    }
}

#[async_trait]
impl MetadataFetcher for DockerHubMetadataFetcher {
    async fn fetch(&self, image: &str, tag: &str) -> Result<Option<RemoteMetadata>> {
        let normalized = self.library.normalize_image_name(image);
        if !normalized.starts_with("docker.io") && !normalized.starts_with("index.docker.io") {
            return Ok(None);
        }

        let name = self.library.image_name_without_registry(image);
        let url = format!("https://hub.docker.com/v2/repositories/{}/tags/{}/", name, tag);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            tracing::debug!(
                image = %image,
                tag = %tag,
                status = response.status().as_u16(),
                "Hub metadata lookup failed"
            );
            return Ok(None);
        }

        let body: HubTagResponse = response.json().await?;
        Ok(Some(RemoteMetadata {
            updated_by: body.last_updater_username,
            update_time: body.last_updated,
        }))
    }
}
