//! Capability surface drydock needs from the container daemon, and the
//! bollard-backed implementation of it.
//!
//! The engine and orchestrator only ever see [`ContainerRuntime`], so both
//! can be exercised against an in-memory fake.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{DrydockError, Result};

/// A container as reported by the daemon's list endpoint.
#[derive(Debug, Clone)]
pub struct ContainerRef {
    pub id: String,
    /// Raw names, including the leading slash the daemon reports
    pub names: Vec<String>,
    /// The image reference the container was created from
    pub image: String,
    pub image_id: String,
    pub labels: HashMap<String, String>,
}

impl ContainerRef {
    /// Names without the daemon's leading slash.
    pub fn display_names(&self) -> Vec<String> {
        self.names
            .iter()
            .map(|n| n.strip_prefix('/').unwrap_or(n).to_string())
            .collect()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Local image inspection result, reduced to what detection needs.
#[derive(Debug, Clone, Default)]
pub struct ImageDetails {
    pub id: String,
    /// `name:tag` references the image is known as
    pub repo_tags: Vec<String>,
    /// `name@digest` strings recorded when the image was pulled
    pub repo_digests: Vec<String>,
    /// Content-addressed filesystem layer ids
    pub layers: Vec<String>,
}

/// Everything needed to run one disposable helper container.
#[derive(Debug, Clone)]
pub struct HelperContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    /// `source:dest` bind mounts
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// One line of combined helper output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Stdout(String),
    Stderr(String),
}

pub type LogStream = BoxStream<'static, Result<LogLine>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRef>>;

    /// List containers in one of `statuses` carrying `label`.
    async fn list_labeled_containers(
        &self,
        statuses: &[&str],
        label: &str,
    ) -> Result<Vec<ContainerRef>>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails>;

    /// All `name:tag` references known to the local daemon.
    async fn known_repo_tags(&self) -> Result<HashSet<String>>;

    /// Pull `image:tag`, waiting at most `timeout` for completion.
    async fn pull_image(&self, image: &str, tag: &str, timeout: Duration) -> Result<()>;

    /// Create a helper container; returns its id.
    async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String>;

    /// Attach to the container's combined stdout/stderr.
    async fn attach_logs(&self, id: &str) -> Result<LogStream>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Wait for the container to exit; returns the exit code.
    async fn wait_container(&self, id: &str) -> Result<i64>;

    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the environment's defaults (DOCKER_HOST or the local socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(DockerRuntime { docker })
    }

    pub fn new(docker: Docker) -> Self {
        DockerRuntime { docker }
    }

    fn to_container_ref(summary: bollard::models::ContainerSummary) -> Option<ContainerRef> {
        let id = summary.id?;
        Some(ContainerRef {
            id,
            names: summary.names.unwrap_or_default(),
            image: summary.image.unwrap_or_default(),
            image_id: summary.image_id.unwrap_or_default(),
            labels: summary.labels.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRef>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(Self::to_container_ref)
            .collect())
    }

    async fn list_labeled_containers(
        &self,
        statuses: &[&str],
        label: &str,
    ) -> Result<Vec<ContainerRef>> {
        let mut filters = HashMap::new();
        filters.insert(
            "status".to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
        filters.insert("label".to_string(), vec![label.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(Self::to_container_ref)
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails> {
        let inspect = self.docker.inspect_image(reference).await?;
        Ok(ImageDetails {
            id: inspect.id.unwrap_or_default(),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            repo_digests: inspect.repo_digests.unwrap_or_default(),
            layers: inspect
                .root_fs
                .and_then(|fs| fs.layers)
                .unwrap_or_default(),
        })
    }

    async fn known_repo_tags(&self) -> Result<HashSet<String>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        let mut tags = HashSet::new();
        for image in images {
            for tag in image.repo_tags {
                tags.insert(tag);
            }
        }
        Ok(tags)
    }

    async fn pull_image(&self, image: &str, tag: &str, timeout: Duration) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut progress = self.docker.create_image(Some(options), None, None);
        let drain = async {
            while let Some(step) = progress.next().await {
                step?;
            }
            Ok::<(), DrydockError>(())
        };

        tokio::time::timeout(timeout, drain).await.map_err(|_| {
            DrydockError::Runtime(format!(
                "pull of {}:{} did not finish within {:?}",
                image, tag, timeout
            ))
        })?
    }

    async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String> {
        let config = ContainerConfig::<String> {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        Ok(response.id)
    }

    async fn attach_logs(&self, id: &str) -> Result<LogStream> {
        let results = self
            .docker
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        let stream = results.output.filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdErr { message }) => Some(Ok(LogLine::Stderr(
                    String::from_utf8_lossy(&message).trim_end().to_string(),
                ))),
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(LogLine::Stdout(
                        String::from_utf8_lossy(&message).trim_end().to_string(),
                    )))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(DrydockError::from(e))),
            }
        });

        Ok(stream.boxed())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits through this error variant
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(DrydockError::Runtime(format!(
                "wait on container {} returned no status",
                id
            ))),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}
