//! In-memory collaborators for exercising the engine and orchestrator
//! without a daemon or a registry.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use drydock::error::{DrydockError, Result};
use drydock::metadata::MetadataFetcher;
use drydock::model::{ContainerUpdate, RemoteMetadata};
use drydock::notify::Notifier;
use drydock::registry::client::ManifestSource;
use drydock::runtime::{
    ContainerRef, ContainerRuntime, HelperContainerSpec, ImageDetails, LogLine, LogStream,
};

pub fn container(
    id: &str,
    name: &str,
    image: &str,
    image_id: &str,
    labels: &[(&str, &str)],
) -> ContainerRef {
    ContainerRef {
        id: id.to_string(),
        names: vec![format!("/{}", name)],
        image: image.to_string(),
        image_id: image_id.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn image_details(id: &str, repo_tags: &[&str], repo_digests: &[&str], layers: &[&str]) -> ImageDetails {
    ImageDetails {
        id: id.to_string(),
        repo_tags: repo_tags.iter().map(|s| s.to_string()).collect(),
        repo_digests: repo_digests.iter().map(|s| s.to_string()).collect(),
        layers: layers.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<Vec<ContainerRef>>,
    /// Keyed by whatever reference `inspect_image` receives (repo tag or id)
    pub images: Mutex<HashMap<String, ImageDetails>>,
    pub known_tags: Mutex<HashSet<String>>,
    /// Images that appear locally once the matching `image:tag` pull runs
    pub images_after_pull: Mutex<HashMap<String, ImageDetails>>,
    pub pulls: Mutex<Vec<(String, String)>>,
    pub helper_specs: Mutex<Vec<HelperContainerSpec>>,
    pub started: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub exit_codes: Mutex<VecDeque<i64>>,
    pub helper_log_lines: Mutex<Vec<LogLine>>,
    pub fail_log_stream: AtomicBool,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, container: ContainerRef) {
        self.containers.lock().unwrap().push(container);
    }

    pub fn add_image(&self, reference: &str, details: ImageDetails) {
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), details);
    }

    pub fn add_known_tag(&self, repo_tag: &str) {
        self.known_tags.lock().unwrap().insert(repo_tag.to_string());
    }

    pub fn push_exit_code(&self, code: i64) {
        self.exit_codes.lock().unwrap().push_back(code);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerRef>> {
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn list_labeled_containers(
        &self,
        _statuses: &[&str],
        label: &str,
    ) -> Result<Vec<ContainerRef>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.labels.contains_key(label))
            .cloned()
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails> {
        self.images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| DrydockError::Runtime(format!("no such image: {}", reference)))
    }

    async fn known_repo_tags(&self) -> Result<HashSet<String>> {
        Ok(self.known_tags.lock().unwrap().clone())
    }

    async fn pull_image(&self, image: &str, tag: &str, _timeout: Duration) -> Result<()> {
        self.pulls
            .lock()
            .unwrap()
            .push((image.to_string(), tag.to_string()));

        let repo_tag = format!("{}:{}", image, tag);
        self.known_tags.lock().unwrap().insert(repo_tag.clone());
        if let Some(details) = self.images_after_pull.lock().unwrap().remove(&repo_tag) {
            self.images.lock().unwrap().insert(repo_tag, details);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &HelperContainerSpec) -> Result<String> {
        self.helper_specs.lock().unwrap().push(spec.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("helper-{}", id))
    }

    async fn attach_logs(&self, _id: &str) -> Result<LogStream> {
        if self.fail_log_stream.load(Ordering::SeqCst) {
            let items: Vec<Result<LogLine>> =
                vec![Err(DrydockError::Runtime("log stream broke".to_string()))];
            return Ok(stream::iter(items).boxed());
        }
        let items: Vec<Result<LogLine>> = self
            .helper_log_lines
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.started.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn wait_container(&self, _id: &str) -> Result<i64> {
        Ok(self.exit_codes.lock().unwrap().pop_front().unwrap_or(0))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRegistry {
    /// `image:tag` -> digest
    pub digests: HashMap<String, String>,
    /// image -> published tags
    pub tags: HashMap<String, Vec<String>>,
    pub digest_calls: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, repo_tag: &str, digest: &str) -> Self {
        self.digests
            .insert(repo_tag.to_string(), digest.to_string());
        self
    }

    pub fn with_tags(mut self, image: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            image.to_string(),
            tags.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl ManifestSource for MockRegistry {
    async fn fetch_digest(&self, image: &str, tag: &str) -> Result<String> {
        let key = format!("{}:{}", image, tag);
        self.digest_calls.lock().unwrap().push(key.clone());
        self.digests
            .get(&key)
            .cloned()
            .ok_or(DrydockError::DigestFetch { status: 404 })
    }

    async fn list_tags(&self, image: &str) -> Result<Vec<String>> {
        Ok(self.tags.get(image).cloned().unwrap_or_default())
    }
}

pub struct NoMetadata;

#[async_trait]
impl MetadataFetcher for NoMetadata {
    async fn fetch(&self, _image: &str, _tag: &str) -> Result<Option<RemoteMetadata>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub updates: Mutex<Vec<Vec<ContainerUpdate>>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_updates(&self, updates: &[ContainerUpdate]) -> Result<()> {
        self.updates.lock().unwrap().push(updates.to_vec());
        Ok(())
    }

    async fn notify_error(&self, error: &DrydockError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
