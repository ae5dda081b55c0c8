//! Resolution of the base image a container tracks.

use std::sync::Arc;

use crate::config::BASE_IMAGE_LABEL;
use crate::error::Result;
use crate::image::ImageIdentifier;
use crate::registry::LibraryHelper;
use crate::runtime::{ContainerRef, ContainerRuntime};

/// How the tracked base was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// The container carries a base label naming `image[:tag]`, decoupled
    /// from the image it actually runs (a locally built derivative).
    Explicit,
    /// The tracked base is the repo-tag of the image the container runs.
    Implicit,
}

/// A container bound to the base image it should track. Downstream detection
/// consumes only this unified shape.
#[derive(Debug, Clone)]
pub struct BaseImageBinding {
    pub container: ContainerRef,
    pub identifier: ImageIdentifier,
    pub kind: BindingKind,
}

impl BaseImageBinding {
    pub fn base_repo_tag(&self) -> String {
        self.identifier.name_with_tag()
    }

    pub fn is_explicit(&self) -> bool {
        self.kind == BindingKind::Explicit
    }
}

/// Resolves a participating container to its binding. Returns `None` when an
/// unlabeled container runs an image without repo tags, which leaves nothing
/// to track.
pub async fn resolve_binding(
    runtime: &dyn ContainerRuntime,
    library: &Arc<LibraryHelper>,
    container: &ContainerRef,
) -> Result<Option<BaseImageBinding>> {
    if let Some(labeled) = container.label(BASE_IMAGE_LABEL) {
        let parsed = ImageIdentifier::parse(labeled);
        return Ok(Some(BaseImageBinding {
            container: container.clone(),
            identifier: ImageIdentifier::new(
                library.friendly_image_name(&parsed.image),
                parsed.tag,
            ),
            kind: BindingKind::Explicit,
        }));
    }

    let image = runtime.inspect_image(&container.image).await?;
    let mut repo_tags = image.repo_tags;
    if repo_tags.is_empty() {
        tracing::info!(
            container = ?container.display_names(),
            "Enrolled container has an untagged image and no base label"
        );
        return Ok(None);
    }
    // Sorted so the tracked tag does not depend on daemon enumeration order
    repo_tags.sort();

    let parsed = ImageIdentifier::parse(&repo_tags[0]);
    Ok(Some(BaseImageBinding {
        container: container.clone(),
        identifier: ImageIdentifier::new(library.friendly_image_name(&parsed.image), parsed.tag),
        kind: BindingKind::Implicit,
    }))
}
