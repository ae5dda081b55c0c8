use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use drydock::config::{Config, INSTANCE_LABEL};
use drydock::detect::UpdateDetectionEngine;
use drydock::metadata::DockerHubMetadataFetcher;
use drydock::notify::{LogNotifier, NoopUpdateFilter, Notifier};
use drydock::registry::{self, LibraryHelper, RegistryClient};
use drydock::runtime::{ContainerRuntime, DockerRuntime};
use drydock::update::SnapshotStore;
use drydock::Result;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&PathBuf::from(path))?,
        None => Config::default(),
    };

    tracing::info!(
        interval_secs = config.check.interval_secs,
        enrollment = ?config.check.enrollment,
        strategy = ?config.check.base_image_strategy,
        "Starting drydock"
    );

    let http = reqwest::Client::builder()
        .user_agent("drydock")
        .timeout(Duration::from_secs(config.registry.http_timeout_secs))
        .build()?;

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);
    verify_instance_count(&*runtime).await;

    let library = Arc::new(LibraryHelper::fetch(&http).await?);
    let auths = load_auths(&config)?;
    let registry_client = Arc::new(RegistryClient::new(http.clone(), library.clone(), auths));
    let metadata = Arc::new(DockerHubMetadataFetcher::new(http.clone(), library.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let filter = NoopUpdateFilter;

    let engine = UpdateDetectionEngine::new(
        runtime.clone(),
        registry_client,
        metadata,
        notifier.clone(),
        library,
        config.check.enrollment,
        config.check.base_image_strategy,
    );

    let orchestrator = if config.updater.entrypoint.is_some() {
        Some(drydock::UpdateOrchestrator::new(runtime.clone(), &config.updater).await?)
    } else {
        None
    };

    let snapshots = SnapshotStore::new();
    let mut interval = tokio::time::interval(Duration::from_secs(config.check.interval_secs));

    // A failed cycle is reported and retried on the next tick, never fatal
    loop {
        interval.tick().await;
        match drydock::run_check_cycle(&engine, &filter, &notifier, &snapshots).await {
            Ok(token) => {
                tracing::info!(snapshot = %token, "Check cycle finished");
                if config.updater.auto_rebuild {
                    if let Some(orchestrator) = &orchestrator {
                        rebuild_snapshot(orchestrator, &snapshots, &token, &notifier).await;
                    }
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "Check cycle failed");
                notifier.notify_error(&error).await;
            }
        }

        match engine.check_tags().await {
            Ok(tag_updates) => {
                for update in &tag_updates {
                    tracing::info!(
                        containers = ?update.names,
                        image = %update.identifier.image,
                        current = %update.current_tag,
                        newer = %update.new_tag,
                        "Tag upgrade available"
                    );
                }
            }
            Err(error) => tracing::error!(error = %error, "Tag check failed"),
        }
    }
}

async fn rebuild_snapshot(
    orchestrator: &drydock::UpdateOrchestrator,
    snapshots: &SnapshotStore,
    token: &str,
    notifier: &Arc<dyn Notifier>,
) {
    let updates = match snapshots.resolve(token, None) {
        Ok(updates) if updates.is_empty() => return,
        Ok(updates) => updates,
        Err(error) => {
            tracing::error!(error = %error, "Could not resolve update snapshot");
            return;
        }
    };

    let result = orchestrator
        .rebuild_containers(&updates, |message| tracing::info!("{}", message))
        .await;
    if let Err(error) = result {
        tracing::error!(error = %error, "Rebuild failed");
        notifier.notify_error(&error).await;
    }
}

fn load_auths(config: &Config) -> Result<Vec<registry::RegistryAuthEntry>> {
    let path = match &config.registry.docker_config_path {
        Some(path) => PathBuf::from(path),
        None => match registry::default_docker_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Vec::new()),
        },
    };

    tracing::info!(path = %path.display(), "Loading registry auth");
    registry::load_authentications(&path)
}

/// Warn when the own-instance label is absent (self-updates cannot be
/// sequenced last) or claimed by several containers.
async fn verify_instance_count(runtime: &dyn ContainerRuntime) {
    let count = match runtime.list_containers(false).await {
        Ok(containers) => containers
            .iter()
            .filter(|c| c.label(INSTANCE_LABEL).is_some())
            .count(),
        Err(error) => {
            tracing::warn!(error = %error, "Could not list containers to find own instance");
            return;
        }
    };

    if count == 0 {
        tracing::warn!(
            label = INSTANCE_LABEL,
            "Label not set on any container; unable to identify own instance"
        );
    }
    if count > 1 {
        tracing::warn!(
            label = INSTANCE_LABEL,
            count,
            "Multiple containers carry the instance label"
        );
    }
}
