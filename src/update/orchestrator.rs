//! Drives the operator-supplied helper container to rebuild stale
//! containers. The orchestrator never recreates containers itself;
//! recreation semantics (volumes, networks, env) belong to the helper.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::config::{UpdaterConfig, HELPER_MARKER_LABEL, PULL_TIMEOUT_SECS};
use crate::error::{DrydockError, Result};
use crate::image::ImageIdentifier;
use crate::model::{ContainerUpdate, ImageUpdate};
use crate::runtime::{ContainerRuntime, HelperContainerSpec, LogLine};

pub struct UpdateOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    helper_image: String,
    entrypoint: String,
    binds: Vec<String>,
}

impl UpdateOrchestrator {
    /// Builds the orchestrator and removes helper containers a previous run
    /// left behind (it may have crashed before its own cleanup).
    pub async fn new(runtime: Arc<dyn ContainerRuntime>, config: &UpdaterConfig) -> Result<Self> {
        config.validate().map_err(DrydockError::Config)?;
        let entrypoint = config.entrypoint.clone().ok_or_else(|| {
            DrydockError::Config("updater entrypoint must be configured".to_string())
        })?;

        let orchestrator = UpdateOrchestrator {
            runtime,
            helper_image: config.image.clone(),
            entrypoint,
            binds: config.mounts.clone(),
        };
        orchestrator.remove_leftover_helpers().await?;
        Ok(orchestrator)
    }

    async fn remove_leftover_helpers(&self) -> Result<()> {
        let leftovers = self
            .runtime
            .list_labeled_containers(&["exited", "created"], HELPER_MARKER_LABEL)
            .await?;

        for container in leftovers {
            tracing::info!(id = %container.id, "Removing leftover helper container");
            self.runtime.remove_container(&container.id).await?;
        }
        Ok(())
    }

    /// Pulls the fresh base image for one update.
    pub async fn update_base_image(&self, update: &ImageUpdate) -> Result<()> {
        tracing::info!(
            base = %update.identifier,
            source = ?update.source_image_names,
            "Updating base image"
        );
        self.runtime
            .pull_image(
                &update.identifier.image,
                &update.identifier.tag,
                Duration::from_secs(PULL_TIMEOUT_SECS),
            )
            .await
    }

    /// Materializes a set of container updates: pulls each distinct base
    /// image, then runs the helper for all non-self containers and, if any
    /// remain, a second isolated helper run for drydock's own containers.
    /// Self-updates go last because replacing our own running container must
    /// not interleave with other work.
    pub async fn rebuild_containers(
        &self,
        updates: &[ContainerUpdate],
        mut progress: impl FnMut(&str),
    ) -> Result<()> {
        tracing::info!(count = updates.len(), "Rebuilding containers");

        let mut pulled = HashSet::new();
        for update in updates {
            let image_update = &update.image_update;
            if pulled.insert((
                image_update.identifier.clone(),
                image_update.remote_manifest_digest.clone(),
            )) {
                self.update_base_image(image_update).await?;
            }
        }

        let other_names = distinct_names(updates.iter().filter(|u| !u.is_self));
        if !other_names.is_empty() {
            self.run_helper(&other_names).await?;
        }

        let self_names = distinct_names(updates.iter().filter(|u| u.is_self));
        if self_names.is_empty() {
            progress("Updated!");
            return Ok(());
        }

        progress(&format!(
            "Updated (except for {} drydock instances)!",
            self_names.len()
        ));

        tracing::info!("Updating drydock itself, no further progress can be reported");
        if self_names.len() > 1 {
            tracing::warn!(
                count = self_names.len(),
                "Multiple drydock instances are being replaced at once"
            );
        }
        self.run_helper(&self_names).await
    }

    async fn run_helper(&self, names: &[String]) -> Result<()> {
        self.pull_helper_image_if_missing().await?;

        let mut command = vec![self.entrypoint.clone()];
        command.extend(names.iter().cloned());

        let mut labels = HashMap::new();
        labels.insert(HELPER_MARKER_LABEL.to_string(), "true".to_string());

        let id = self
            .runtime
            .create_container(&HelperContainerSpec {
                image: self.helper_image.clone(),
                command,
                binds: self.binds.clone(),
                labels,
            })
            .await?;
        tracing::info!(id = %id, "Created helper container");

        let mut logs = self.runtime.attach_logs(&id).await?;
        let drain = tokio::spawn(async move {
            while let Some(line) = logs.next().await {
                match line? {
                    LogLine::Stdout(text) => tracing::info!("[updater] {}", text),
                    LogLine::Stderr(text) => tracing::warn!("[updater] {}", text),
                }
            }
            Ok::<(), DrydockError>(())
        });

        self.runtime.start_container(&id).await?;
        let exit = self.runtime.wait_container(&id).await;

        // A broken log stream means the exit code cannot be trusted
        match drain.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                return Err(DrydockError::RebuildFailed(format!(
                    "helper log stream failed, updater status unknown: {}",
                    error
                )));
            }
            Err(error) => {
                return Err(DrydockError::RebuildFailed(format!(
                    "helper log task failed, updater status unknown: {}",
                    error
                )));
            }
        }

        let exit = exit.map_err(|error| {
            DrydockError::RebuildFailed(format!("waiting for the helper failed: {}", error))
        })?;
        if exit != 0 {
            tracing::warn!(code = exit, "Rebuild failed");
            return Err(DrydockError::RebuildFailed(format!(
                "rebuild script failed, exit code: {}",
                exit
            )));
        }

        tracing::info!("Rebuild successful");
        Ok(())
    }

    async fn pull_helper_image_if_missing(&self) -> Result<()> {
        let reference = if self.helper_image.contains(':') {
            self.helper_image.clone()
        } else {
            format!("{}:latest", self.helper_image)
        };

        if self.runtime.known_repo_tags().await?.contains(&reference) {
            return Ok(());
        }

        tracing::info!(image = %reference, "Helper image not present locally, pulling");
        let identifier = ImageIdentifier::parse(&reference);
        self.runtime
            .pull_image(
                &identifier.image,
                &identifier.tag,
                Duration::from_secs(PULL_TIMEOUT_SECS),
            )
            .await
    }
}

/// Distinct container names in first-seen order.
fn distinct_names<'a>(updates: impl Iterator<Item = &'a ContainerUpdate>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for update in updates {
        for name in &update.names {
            if seen.insert(name.clone()) {
                names.push(name.clone());
            }
        }
    }
    names
}
