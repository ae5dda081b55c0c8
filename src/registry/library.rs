//! Helper for Docker's "official library" program. The registry APIs assume
//! callers already know which images are official so the `library/` path
//! prefix can be added; the authoritative list lives in the
//! `docker-library/official-images` repository, fetched once at startup.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::{CANONICAL_REGISTRY_HOST, DEFAULT_REGISTRY_NAME, OFFICIAL_IMAGES_URL};
use crate::error::{DrydockError, Result};

fn explicit_registry_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A leading path segment containing a dot is a registry host
    RE.get_or_init(|| Regex::new(r"^.+\..+/.+$").expect("static pattern"))
}

#[derive(Deserialize)]
struct LibraryEntry {
    path: String,
}

pub struct LibraryHelper {
    library_images: HashSet<String>,
}

impl LibraryHelper {
    /// Fetches the current official-images list from GitHub.
    pub async fn fetch(client: &reqwest::Client) -> Result<Self> {
        let entries: Vec<LibraryEntry> = client
            .get(OFFICIAL_IMAGES_URL)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| DrydockError::Registry(format!("official image list fetch: {}", e)))?
            .json()
            .await?;

        let library_images = entries
            .into_iter()
            .map(|e| e.path.trim_start_matches("library/").to_string())
            .collect::<HashSet<_>>();

        tracing::debug!(count = library_images.len(), "Fetched official library image list");
        Ok(LibraryHelper { library_images })
    }

    /// Builds a helper from a known image set. Used in tests and when the
    /// list lookup should be skipped.
    pub fn with_images(library_images: HashSet<String>) -> Self {
        LibraryHelper { library_images }
    }

    pub fn is_library_image(&self, image: &str) -> bool {
        if let Some(rest) = image.strip_prefix("docker.io/") {
            return self.is_library_image(rest);
        }
        if let Some(rest) = image.strip_prefix("index.docker.io/") {
            return self.is_library_image(rest);
        }
        self.library_images.contains(image)
    }

    /// Normalized image name with the registry and `library/` prefixes
    /// prepended as needed; `docker.io` rewrites to the canonical API host.
    pub fn normalize_image_name(&self, image: &str) -> String {
        let mut result = image.to_string();
        if self.is_library_image(image) {
            result = format!("library/{}", result);
        }

        if !explicit_registry_pattern().is_match(image) {
            result = format!("{}/{}", DEFAULT_REGISTRY_NAME, result);
        }

        if let Some(rest) = result.strip_prefix(DEFAULT_REGISTRY_NAME) {
            result = format!("{}{}", CANONICAL_REGISTRY_HOST, rest);
        }

        result
    }

    /// Normalized name with the registry host stripped; the repository path
    /// used in `/v2/<repo>/...` URLs.
    pub fn image_name_without_registry(&self, image: &str) -> String {
        let name = self.normalize_image_name(image);
        match name.find('/') {
            Some(idx) => name[idx + 1..].to_string(),
            None => name,
        }
    }

    /// The repository part of the auth scope for an image.
    pub fn scope_for_image(&self, image: &str) -> String {
        self.image_name_without_registry(image)
    }

    /// The name a human (or `docker image inspect`) uses: no canonical
    /// registry host, no `library/` prefix.
    pub fn friendly_image_name(&self, image: &str) -> String {
        let mut name = self.normalize_image_name(image);
        if let Some(rest) = name.strip_prefix("index.docker.io/") {
            name = rest.to_string();
        }
        if let Some(rest) = name.strip_prefix("library/") {
            name = rest.to_string();
        }
        name
    }
}
