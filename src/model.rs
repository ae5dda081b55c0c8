//! Detection result types handed between the engine, notifiers and the
//! orchestrator. Everything here is recomputed fresh each cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::image::ImageIdentifier;

/// Who pushed the remote image and when, as reported by the hub.
/// Enrichment only; absence is never an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub updated_by: String,
    pub update_time: DateTime<Utc>,
}

/// One detected staleness event for a local image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageUpdate {
    /// Image id of the (derivative) image the affected containers run
    pub source_image_id: String,
    /// All repo tags (`name:tag`) the local image is known as
    pub source_image_names: Vec<String>,
    /// Digest of the remote base manifest that superseded the local one
    pub remote_manifest_digest: String,
    /// The tracked base image
    pub identifier: ImageIdentifier,
    pub metadata: Option<RemoteMetadata>,
}

/// An [`ImageUpdate`] scoped to the containers that run the stale image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerUpdate {
    /// Container names, without the leading slash the daemon reports
    pub names: Vec<String>,
    pub image_update: ImageUpdate,
    /// Whether this container is a drydock instance itself; self-updates are
    /// sequenced last by the orchestrator
    pub is_self: bool,
}

/// A version upgrade detected by tag comparison (independent of digests).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub names: Vec<String>,
    pub current_tag: String,
    pub new_tag: String,
    /// The tracked image, carrying the new tag
    pub identifier: ImageIdentifier,
    pub metadata: Option<RemoteMetadata>,
}
