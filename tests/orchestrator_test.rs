//! Orchestrator behavior: helper invocations, self-update sequencing,
//! failure propagation, crash-recovery cleanup.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use drydock::config::UpdaterConfig;
use drydock::error::DrydockError;
use drydock::image::ImageIdentifier;
use drydock::model::{ContainerUpdate, ImageUpdate};
use drydock::update::UpdateOrchestrator;

use support::{container, MockRuntime};

fn updater_config() -> UpdaterConfig {
    UpdaterConfig {
        image: "docker".to_string(),
        entrypoint: Some("/rebuild.sh".to_string()),
        mounts: vec!["/var/run/docker.sock:/var/run/docker.sock".to_string()],
        auto_rebuild: false,
    }
}

fn image_update(base: &str, digest: &str) -> ImageUpdate {
    ImageUpdate {
        source_image_id: format!("sha256:src-{}", base),
        source_image_names: vec![format!("{}-app:latest", base)],
        remote_manifest_digest: digest.to_string(),
        identifier: ImageIdentifier::parse(&format!("{}:stable", base)),
        metadata: None,
    }
}

fn container_update(name: &str, base: &str, is_self: bool) -> ContainerUpdate {
    ContainerUpdate {
        names: vec![name.to_string()],
        image_update: image_update(base, "sha256:fresh"),
        is_self,
    }
}

async fn orchestrator(runtime: Arc<MockRuntime>) -> UpdateOrchestrator {
    runtime.add_known_tag("docker:latest");
    UpdateOrchestrator::new(runtime, &updater_config())
        .await
        .unwrap()
}

/// Two normal updates and one self update: exactly two helper runs, the
/// self name strictly last and alone.
#[tokio::test]
async fn self_updates_run_in_a_second_isolated_invocation() {
    let runtime = Arc::new(MockRuntime::new());
    let orchestrator = orchestrator(runtime.clone()).await;

    let updates = vec![
        container_update("web", "nginx", false),
        container_update("db", "postgres", false),
        container_update("drydock", "drydock", true),
    ];

    let mut progress_messages = Vec::new();
    orchestrator
        .rebuild_containers(&updates, |message| {
            progress_messages.push(message.to_string())
        })
        .await
        .unwrap();

    let specs = runtime.helper_specs.lock().unwrap();
    assert_eq!(specs.len(), 2, "one run for others, one for self");
    assert_eq!(
        specs[0].command,
        vec![
            "/rebuild.sh".to_string(),
            "web".to_string(),
            "db".to_string()
        ]
    );
    assert_eq!(
        specs[1].command,
        vec!["/rebuild.sh".to_string(), "drydock".to_string()]
    );
    assert_eq!(specs[0].image, "docker");
    assert_eq!(
        specs[0].binds,
        vec!["/var/run/docker.sock:/var/run/docker.sock".to_string()]
    );
    assert!(specs[0].labels.contains_key("drydock-helper-container"));

    // Interim progress was reported before the self run
    assert_eq!(progress_messages.len(), 1);
    assert!(progress_messages[0].contains("1"));

    // One pull per distinct base image
    let pulls = runtime.pulls.lock().unwrap();
    assert_eq!(pulls.len(), 3);
    assert!(pulls.contains(&("nginx".to_string(), "stable".to_string())));
}

#[tokio::test]
async fn duplicate_base_images_are_pulled_once() {
    let runtime = Arc::new(MockRuntime::new());
    let orchestrator = orchestrator(runtime.clone()).await;

    let updates = vec![
        container_update("web-1", "nginx", false),
        container_update("web-2", "nginx", false),
    ];

    orchestrator
        .rebuild_containers(&updates, |_| {})
        .await
        .unwrap();

    assert_eq!(runtime.pulls.lock().unwrap().len(), 1);
    assert_eq!(runtime.helper_specs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn without_self_updates_progress_reports_done() {
    let runtime = Arc::new(MockRuntime::new());
    let orchestrator = orchestrator(runtime.clone()).await;

    let mut progress_messages = Vec::new();
    orchestrator
        .rebuild_containers(&[container_update("web", "nginx", false)], |message| {
            progress_messages.push(message.to_string())
        })
        .await
        .unwrap();

    assert_eq!(progress_messages, vec!["Updated!".to_string()]);
    assert_eq!(runtime.helper_specs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn nonzero_helper_exit_fails_the_rebuild() {
    let runtime = Arc::new(MockRuntime::new());
    let orchestrator = orchestrator(runtime.clone()).await;
    runtime.push_exit_code(42);

    let result = orchestrator
        .rebuild_containers(&[container_update("web", "nginx", false)], |_| {})
        .await;

    assert!(matches!(result, Err(DrydockError::RebuildFailed(_))));
}

/// A broken log stream means the exit code cannot be trusted, so the
/// rebuild fails even though the helper exited cleanly.
#[tokio::test]
async fn broken_log_stream_fails_the_rebuild() {
    let runtime = Arc::new(MockRuntime::new());
    let orchestrator = orchestrator(runtime.clone()).await;
    runtime.fail_log_stream.store(true, Ordering::SeqCst);

    let result = orchestrator
        .rebuild_containers(&[container_update("web", "nginx", false)], |_| {})
        .await;

    assert!(matches!(result, Err(DrydockError::RebuildFailed(_))));
}

#[tokio::test]
async fn missing_helper_image_is_pulled_first() {
    let runtime = Arc::new(MockRuntime::new());
    // known_tags intentionally left empty
    let orchestrator = UpdateOrchestrator::new(runtime.clone(), &updater_config())
        .await
        .unwrap();

    orchestrator
        .rebuild_containers(&[container_update("web", "nginx", false)], |_| {})
        .await
        .unwrap();

    let pulls = runtime.pulls.lock().unwrap();
    assert!(pulls.contains(&("docker".to_string(), "latest".to_string())));
}

/// Leftover helper containers from a crashed run are removed at construction.
#[tokio::test]
async fn construction_cleans_up_leftover_helpers() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.add_container(container(
        "old-helper",
        "helper",
        "docker:latest",
        "sha256:docker",
        &[("drydock-helper-container", "true")],
    ));

    let _ = UpdateOrchestrator::new(runtime.clone(), &updater_config())
        .await
        .unwrap();

    assert_eq!(
        *runtime.removed.lock().unwrap(),
        vec!["old-helper".to_string()]
    );
}

#[tokio::test]
async fn missing_entrypoint_is_a_config_error() {
    let runtime = Arc::new(MockRuntime::new());
    let config = UpdaterConfig {
        entrypoint: None,
        ..updater_config()
    };

    let result = UpdateOrchestrator::new(runtime, &config).await;
    assert!(matches!(result, Err(DrydockError::Config(_))));
}
