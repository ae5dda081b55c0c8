//! Tag-upgrade check: orders published tags by version and reports when a
//! newer one exists. Runs independently of the digest comparison and only
//! for containers that opt into it via the strategy label.

use std::collections::HashSet;

use regex::Regex;
use semver::Version;

use crate::config::{TAG_IGNORE_LABEL, TAG_KEEP_LABEL, TAG_STRATEGY_LABEL};
use crate::detect::binding::resolve_binding;
use crate::detect::engine::UpdateDetectionEngine;
use crate::detect::enrollment::is_participating;
use crate::error::{DrydockError, Result};
use crate::model::TagUpdate;
use crate::runtime::ContainerRef;
use crate::version::VersionStrategy;

impl UpdateDetectionEngine {
    /// One tag-upgrade check per participating, strategy-labeled container
    /// (deduplicated by image id like the digest check).
    pub async fn check_tags(&self) -> Result<Vec<TagUpdate>> {
        let mut containers = self.runtime.list_containers(false).await?;
        containers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen_image_ids = HashSet::new();
        let mut updates = Vec::new();

        for container in containers {
            if !is_participating(self.enrollment, &container) {
                continue;
            }
            let Some(raw_strategy) = container.label(TAG_STRATEGY_LABEL).map(str::to_string)
            else {
                continue;
            };
            if !seen_image_ids.insert(container.image_id.clone()) {
                continue;
            }

            match self.check_container_tags(&container, &raw_strategy).await {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        container = ?container.display_names(),
                        error = %error,
                        "Skipping tag check after error"
                    );
                    self.notifier.notify_error(&error).await;
                }
            }
        }

        Ok(updates)
    }

    async fn check_container_tags(
        &self,
        container: &ContainerRef,
        raw_strategy: &str,
    ) -> Result<Option<TagUpdate>> {
        let strategy: VersionStrategy = raw_strategy
            .parse()
            .map_err(|e: crate::version::VersionParseError| {
                DrydockError::Config(format!("invalid tag strategy label: {}", e))
            })?;

        let keep = compile_filter(container, TAG_KEEP_LABEL)?;
        let ignore = compile_filter(container, TAG_IGNORE_LABEL)?;

        let Some(binding) = resolve_binding(&*self.runtime, &self.library, container).await? else {
            return Ok(None);
        };

        let current_tag = binding.identifier.tag.clone();
        let current = match strategy.parse(&current_tag) {
            Ok(version) => version,
            Err(error) => {
                tracing::warn!(
                    container = ?container.display_names(),
                    tag = %current_tag,
                    error = %error,
                    "Current tag is not a parseable version, skipping tag check"
                );
                return Ok(None);
            }
        };

        let tags = self.registry.list_tags(&binding.identifier.image).await?;

        let mut best: Option<(Version, String)> = None;
        for tag in tags {
            if let Some(keep) = &keep {
                if !keep.is_match(&tag) {
                    continue;
                }
            }
            if let Some(ignore) = &ignore {
                if ignore.is_match(&tag) {
                    continue;
                }
            }

            let version = match strategy.parse(&tag) {
                Ok(version) => version,
                Err(error) => {
                    tracing::debug!(tag = %tag, error = %error, "Skipping unparseable tag");
                    continue;
                }
            };

            let replace = match &best {
                Some((best_version, _)) => version > *best_version,
                None => true,
            };
            if replace {
                best = Some((version, tag));
            }
        }

        let Some((best_version, best_tag)) = best else {
            return Ok(None);
        };
        if best_version <= current {
            return Ok(None);
        }

        tracing::info!(
            container = ?container.display_names(),
            image = %binding.identifier.image,
            current = %current_tag,
            newer = %best_tag,
            "Newer tag available"
        );

        let metadata = match self
            .metadata
            .fetch(&binding.identifier.image, &best_tag)
            .await
        {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(
                    image = %binding.identifier.image,
                    error = %error,
                    "Metadata enrichment failed, continuing without it"
                );
                None
            }
        };

        Ok(Some(TagUpdate {
            names: container.display_names(),
            current_tag,
            new_tag: best_tag.clone(),
            identifier: binding.identifier.with_tag(best_tag),
            metadata,
        }))
    }
}

fn compile_filter(container: &ContainerRef, label: &str) -> Result<Option<Regex>> {
    match container.label(label) {
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|e| DrydockError::Config(format!("invalid {} pattern: {}", label, e))),
        None => Ok(None),
    }
}
