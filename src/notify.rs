//! Outbound collaborator contracts. Rendering rich notifications
//! (chat, push) and persisting the already-notified store live outside this
//! crate; these traits are the seam they plug into.

use async_trait::async_trait;

use crate::error::{DrydockError, Result};
use crate::model::ContainerUpdate;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_updates(&self, updates: &[ContainerUpdate]) -> Result<()>;

    /// Reports an error a check cycle swallowed. Must not fail itself.
    async fn notify_error(&self, error: &DrydockError);
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_updates(&self, updates: &[ContainerUpdate]) -> Result<()> {
        for update in updates {
            tracing::info!(
                containers = ?update.names,
                base = %update.image_update.identifier,
                digest = %update.image_update.remote_manifest_digest,
                is_self = update.is_self,
                "Update available"
            );
        }
        Ok(())
    }

    async fn notify_error(&self, error: &DrydockError) {
        tracing::error!(error = %error, "Check cycle reported an error");
    }
}

/// Drops updates that were already reported. The durable implementation is
/// an external collaborator; this contract mirrors its two-phase shape so a
/// notify failure keeps the updates eligible for the next cycle.
#[async_trait]
pub trait UpdateFilter: Send + Sync {
    async fn filter(&self, updates: Vec<ContainerUpdate>) -> Vec<ContainerUpdate>;

    /// Persist what [`UpdateFilter::filter`] saw; called only after the
    /// notifier accepted the batch.
    async fn commit(&self) -> Result<()>;
}

/// Pass-through filter: every update is notified every cycle.
pub struct NoopUpdateFilter;

#[async_trait]
impl UpdateFilter for NoopUpdateFilter {
    async fn filter(&self, updates: Vec<ContainerUpdate>) -> Vec<ContainerUpdate> {
        updates
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }
}
