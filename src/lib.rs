pub mod config;
pub mod detect;
pub mod error;
pub mod image;
pub mod metadata;
pub mod model;
pub mod notify;
pub mod registry;
pub mod runtime;
pub mod update;
pub mod version;

pub use config::{BaseImageStrategy, Config, EnrollmentMode};
pub use detect::UpdateDetectionEngine;
pub use error::{DrydockError, Result};
pub use image::ImageIdentifier;
pub use model::{ContainerUpdate, ImageUpdate, TagUpdate};
pub use registry::{LibraryHelper, RegistryClient};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use update::{SnapshotStore, UpdateOrchestrator};

use std::sync::Arc;

use notify::{Notifier, UpdateFilter};

/// Runs one full check cycle: detect, filter, notify, publish the snapshot
/// interactive triggers resolve against. Returns the snapshot token.
pub async fn run_check_cycle(
    engine: &UpdateDetectionEngine,
    filter: &dyn UpdateFilter,
    notifier: &Arc<dyn Notifier>,
    snapshots: &SnapshotStore,
) -> Result<String> {
    tracing::info!("Checking for updates...");
    let updates = engine.check().await?;
    let updates = filter.filter(updates).await;

    notifier.notify_updates(&updates).await?;
    // Only after the notifier accepted the batch
    filter.commit().await?;

    Ok(snapshots.publish(updates))
}
