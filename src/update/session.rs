//! Interactive rebuild triggers resolve against the snapshot of updates they
//! were issued for. Each snapshot carries an identity token; a trigger whose
//! token no longer matches the current snapshot is rejected instead of
//! acting on data the user never saw.

use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{DrydockError, Result};
use crate::model::ContainerUpdate;

#[derive(Debug, Clone)]
pub struct UpdateSnapshot {
    updates: Vec<ContainerUpdate>,
    token: String,
}

impl UpdateSnapshot {
    pub fn new(updates: Vec<ContainerUpdate>) -> Self {
        let token = identity_token(&updates);
        UpdateSnapshot { updates, token }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn updates(&self) -> &[ContainerUpdate] {
        &self.updates
    }

    /// The subset of updates covering `names`. Unknown names are ignored;
    /// the caller can only narrow what the snapshot already holds.
    pub fn select(&self, names: &[String]) -> Vec<ContainerUpdate> {
        self.updates
            .iter()
            .filter(|update| update.names.iter().any(|n| names.contains(n)))
            .cloned()
            .collect()
    }
}

fn identity_token(updates: &[ContainerUpdate]) -> String {
    let mut hasher = Sha256::new();
    for update in updates {
        for name in &update.names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(update.image_update.source_image_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(update.image_update.remote_manifest_digest.as_bytes());
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Single-writer holder for the latest snapshot.
pub struct SnapshotStore {
    current: Mutex<Option<UpdateSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        SnapshotStore {
            current: Mutex::new(None),
        }
    }

    /// Replaces the current snapshot; returns its identity token.
    pub fn publish(&self, updates: Vec<ContainerUpdate>) -> String {
        let snapshot = UpdateSnapshot::new(updates);
        let token = snapshot.token.clone();
        *self.current.lock().expect("snapshot store poisoned") = Some(snapshot);
        token
    }

    /// Resolves a trigger against the current snapshot. `names` narrows the
    /// update set; `None` takes the whole snapshot.
    pub fn resolve(&self, token: &str, names: Option<&[String]>) -> Result<Vec<ContainerUpdate>> {
        let guard = self.current.lock().expect("snapshot store poisoned");
        let snapshot = guard.as_ref().ok_or(DrydockError::StaleSnapshot)?;
        if snapshot.token != token {
            return Err(DrydockError::StaleSnapshot);
        }
        Ok(match names {
            Some(names) => snapshot.select(names),
            None => snapshot.updates.clone(),
        })
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
