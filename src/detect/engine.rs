//! The per-cycle staleness check.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BaseImageStrategy, EnrollmentMode, INSTANCE_LABEL, PULL_TIMEOUT_SECS};
use crate::detect::binding::{resolve_binding, BaseImageBinding, BindingKind};
use crate::detect::enrollment::is_participating;
use crate::error::Result;
use crate::metadata::MetadataFetcher;
use crate::model::{ContainerUpdate, ImageUpdate};
use crate::notify::Notifier;
use crate::registry::client::ManifestSource;
use crate::registry::LibraryHelper;
use crate::runtime::{ContainerRuntime, ImageDetails};

/// `true` when no locally recorded repo-digest ends with the remote digest.
pub fn is_outdated(local_digests: &[String], remote_digest: &str) -> bool {
    !local_digests.iter().any(|d| d.ends_with(remote_digest))
}

/// `true` when every base layer also appears in the container image's layer
/// set. Containment, not equality: the container runs a derivative whose own
/// digest never equals the base's.
pub fn layers_contained(base_layers: &[String], container_layers: &[String]) -> bool {
    let container: HashSet<&str> = container_layers.iter().map(String::as_str).collect();
    base_layers.iter().all(|layer| {
        let present = container.contains(layer.as_str());
        if !present {
            tracing::debug!(layer = %layer, "Base layer missing from container image");
        }
        present
    })
}

pub struct UpdateDetectionEngine {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) registry: Arc<dyn ManifestSource>,
    pub(crate) metadata: Arc<dyn MetadataFetcher>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) library: Arc<LibraryHelper>,
    pub(crate) enrollment: EnrollmentMode,
    pub(crate) strategy: BaseImageStrategy,
}

impl UpdateDetectionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn ManifestSource>,
        metadata: Arc<dyn MetadataFetcher>,
        notifier: Arc<dyn Notifier>,
        library: Arc<LibraryHelper>,
        enrollment: EnrollmentMode,
        strategy: BaseImageStrategy,
    ) -> Self {
        UpdateDetectionEngine {
            runtime,
            registry,
            metadata,
            notifier,
            library,
            enrollment,
            strategy,
        }
    }

    /// Finds stale images and scopes each to every container running it,
    /// including stopped ones.
    pub async fn check(&self) -> Result<Vec<ContainerUpdate>> {
        let image_updates = self.check_images().await?;

        let mut by_image_id: HashMap<&str, &ImageUpdate> = HashMap::new();
        for update in &image_updates {
            // First wins; updates arrive in deterministic (id-sorted) order
            by_image_id
                .entry(update.source_image_id.as_str())
                .or_insert(update);
        }

        let mut containers = self.runtime.list_containers(true).await?;
        containers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut updates = Vec::new();
        for container in containers {
            let Some(image_update) = by_image_id.get(container.image_id.as_str()) else {
                if is_participating(self.enrollment, &container) {
                    tracing::debug!(container = ?container.display_names(), "Container is up to date");
                }
                continue;
            };

            tracing::info!(
                container = ?container.display_names(),
                digest = %image_update.remote_manifest_digest,
                "Container has an update"
            );
            updates.push(ContainerUpdate {
                names: container.display_names(),
                image_update: (*image_update).clone(),
                is_self: container.label(INSTANCE_LABEL).is_some(),
            });
        }

        Ok(updates)
    }

    /// One staleness check per distinct participating image.
    pub async fn check_images(&self) -> Result<Vec<ImageUpdate>> {
        let mut updates = self.check_bindings(BindingKind::Explicit).await?;
        updates.extend(self.check_bindings(BindingKind::Implicit).await?);
        Ok(updates)
    }

    async fn check_bindings(&self, kind: BindingKind) -> Result<Vec<ImageUpdate>> {
        let bindings = self.participating_bindings(kind).await?;

        if kind == BindingKind::Explicit {
            self.pull_unknown_base_images(&bindings).await?;
        }

        let mut updates = Vec::new();
        for binding in bindings {
            match self.check_binding(&binding).await {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(error) => {
                    // One broken binding must not starve the rest of the fleet
                    tracing::warn!(
                        container = ?binding.container.display_names(),
                        base = %binding.identifier,
                        error = %error,
                        "Skipping binding after detection error"
                    );
                    self.notifier.notify_error(&error).await;
                }
            }
        }

        Ok(updates)
    }

    /// Participating containers of one binding kind, deduplicated to one
    /// representative per image id. Containers are sorted by id first so the
    /// representative does not depend on daemon enumeration order.
    async fn participating_bindings(&self, kind: BindingKind) -> Result<Vec<BaseImageBinding>> {
        let mut containers = self.runtime.list_containers(false).await?;
        containers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen_image_ids = HashSet::new();
        let mut bindings = Vec::new();

        for container in containers {
            if !is_participating(self.enrollment, &container) {
                continue;
            }
            let Some(binding) = resolve_binding(&*self.runtime, &self.library, &container).await?
            else {
                continue;
            };
            if binding.kind != kind {
                continue;
            }
            if seen_image_ids.insert(binding.container.image_id.clone()) {
                bindings.push(binding);
            }
        }

        Ok(bindings)
    }

    async fn pull_unknown_base_images(&self, bindings: &[BaseImageBinding]) -> Result<()> {
        let known = self.runtime.known_repo_tags().await?;

        for binding in bindings {
            let repo_tag = binding.base_repo_tag();
            if known.contains(&repo_tag) {
                tracing::debug!(
                    base = %repo_tag,
                    container = ?binding.container.display_names(),
                    "Base image already present"
                );
                continue;
            }
            self.pull_base_image(&binding.identifier.image, &binding.identifier.tag)
                .await?;
        }

        Ok(())
    }

    async fn pull_base_image(&self, image: &str, tag: &str) -> Result<()> {
        tracing::info!(image = %image, tag = %tag, "Pulling base image");
        self.runtime
            .pull_image(image, tag, Duration::from_secs(PULL_TIMEOUT_SECS))
            .await
    }

    async fn check_binding(&self, binding: &BaseImageBinding) -> Result<Option<ImageUpdate>> {
        match binding.kind {
            BindingKind::Explicit => self.check_explicit_binding(binding).await,
            BindingKind::Implicit => self.check_implicit_binding(binding).await,
        }
    }

    async fn check_explicit_binding(
        &self,
        binding: &BaseImageBinding,
    ) -> Result<Option<ImageUpdate>> {
        let mut base = self.runtime.inspect_image(&binding.base_repo_tag()).await?;
        if base.repo_digests.is_empty() {
            tracing::warn!(base = %binding.identifier, "Could not find repo digest for base image");
            return Ok(None);
        }

        let remote_digest = self
            .registry
            .fetch_digest(&binding.identifier.image, &binding.identifier.tag)
            .await?;

        if is_outdated(&base.repo_digests, &remote_digest) {
            if self.strategy.updates_outdated() {
                tracing::info!(base = %binding.identifier, "Updating outdated base image");
                self.pull_base_image(&binding.identifier.image, &binding.identifier.tag)
                    .await?;
                base = self.runtime.inspect_image(&binding.base_repo_tag()).await?;
            } else {
                // The local base is known stale and will not be refreshed;
                // comparing layers against it would prove nothing.
                tracing::info!(
                    container = ?binding.container.display_names(),
                    base = %binding.identifier,
                    "Base image is outdated"
                );
                return Ok(Some(self.build_update(binding, remote_digest).await?));
            }
        }

        let container_image = self
            .runtime
            .inspect_image(&binding.container.image_id)
            .await?;
        if layers_contained(&base.layers, &container_image.layers) {
            tracing::debug!(base = %binding.identifier, "Container is built on the current base");
            return Ok(None);
        }

        tracing::info!(
            container = ?binding.container.display_names(),
            base = %binding.identifier,
            "Container is out of date for its base image"
        );
        Ok(Some(self.build_update(binding, remote_digest).await?))
    }

    async fn check_implicit_binding(
        &self,
        binding: &BaseImageBinding,
    ) -> Result<Option<ImageUpdate>> {
        let image = self
            .runtime
            .inspect_image(&binding.container.image_id)
            .await?;
        if image.repo_digests.is_empty() {
            tracing::warn!(base = %binding.identifier, "Could not find repo digest for image");
            return Ok(None);
        }

        let remote_digest = self
            .registry
            .fetch_digest(&binding.identifier.image, &binding.identifier.tag)
            .await?;

        if !is_outdated(&image.repo_digests, &remote_digest) {
            return Ok(None);
        }

        tracing::info!(
            container = ?binding.container.display_names(),
            image = %binding.identifier,
            "Image is out of date"
        );
        Ok(Some(self.build_update(binding, remote_digest).await?))
    }

    async fn build_update(
        &self,
        binding: &BaseImageBinding,
        remote_digest: String,
    ) -> Result<ImageUpdate> {
        let container_image: ImageDetails = self
            .runtime
            .inspect_image(&binding.container.image_id)
            .await?;

        let metadata = match self
            .metadata
            .fetch(&binding.identifier.image, &binding.identifier.tag)
            .await
        {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(
                    image = %binding.identifier,
                    error = %error,
                    "Metadata enrichment failed, continuing without it"
                );
                None
            }
        };

        Ok(ImageUpdate {
            source_image_id: binding.container.image_id.clone(),
            source_image_names: container_image.repo_tags,
            remote_manifest_digest: remote_digest,
            identifier: binding.identifier.clone(),
            metadata,
        })
    }
}
