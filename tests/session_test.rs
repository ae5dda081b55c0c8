//! Snapshot identity for interactive rebuild triggers.

use drydock::error::DrydockError;
use drydock::image::ImageIdentifier;
use drydock::model::{ContainerUpdate, ImageUpdate};
use drydock::update::{SnapshotStore, UpdateSnapshot};

fn update(name: &str, digest: &str) -> ContainerUpdate {
    ContainerUpdate {
        names: vec![name.to_string()],
        image_update: ImageUpdate {
            source_image_id: format!("sha256:{}", name),
            source_image_names: vec![format!("{}:latest", name)],
            remote_manifest_digest: digest.to_string(),
            identifier: ImageIdentifier::parse("nginx:1.25"),
            metadata: None,
        },
        is_self: false,
    }
}

#[test]
fn identical_update_sets_share_a_token() {
    let a = UpdateSnapshot::new(vec![update("web", "sha256:d1")]);
    let b = UpdateSnapshot::new(vec![update("web", "sha256:d1")]);
    assert_eq!(a.token(), b.token());

    let c = UpdateSnapshot::new(vec![update("web", "sha256:d2")]);
    assert_ne!(a.token(), c.token());
}

#[test]
fn triggers_against_the_current_snapshot_resolve() {
    let store = SnapshotStore::new();
    let token = store.publish(vec![update("web", "sha256:d1"), update("db", "sha256:d2")]);

    let all = store.resolve(&token, None).unwrap();
    assert_eq!(all.len(), 2);

    let narrowed = store
        .resolve(&token, Some(&["db".to_string()]))
        .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].names, vec!["db".to_string()]);
}

#[test]
fn stale_tokens_are_rejected() {
    let store = SnapshotStore::new();
    let old_token = store.publish(vec![update("web", "sha256:d1")]);

    // A new cycle found a different update set
    store.publish(vec![update("web", "sha256:d2")]);

    let result = store.resolve(&old_token, None);
    assert!(matches!(result, Err(DrydockError::StaleSnapshot)));
}

#[test]
fn empty_store_rejects_any_trigger() {
    let store = SnapshotStore::new();
    assert!(matches!(
        store.resolve("deadbeef", None),
        Err(DrydockError::StaleSnapshot)
    ));
}

#[test]
fn unknown_names_only_narrow() {
    let snapshot = UpdateSnapshot::new(vec![update("web", "sha256:d1")]);
    let selected = snapshot.select(&["web".to_string(), "ghost".to_string()]);
    assert_eq!(selected.len(), 1);
}
