use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{DrydockError, Result};

// Constants for hardcoded values
/// Default Docker registry name
pub const DEFAULT_REGISTRY_NAME: &str = "docker.io";

/// Canonical API host the default registry name rewrites to
pub const CANONICAL_REGISTRY_HOST: &str = "index.docker.io";

/// Manifest Accept header for digest fetches.
/// All three media types are offered at once so the registry answers with
/// whatever the local daemon would have negotiated; the digest comparison
/// only works if both sides resolved the same manifest.
pub const MANIFEST_ACCEPT_HEADER: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Default token expiry in seconds (5 minutes)
pub const DEFAULT_TOKEN_EXPIRY_SECS: u64 = 300;

/// Safety margin to subtract from token expiry (10 seconds)
pub const TOKEN_EXPIRY_SAFETY_MARGIN_SECS: u64 = 10;

/// Bounded wait for any single image pull (5 minutes)
pub const PULL_TIMEOUT_SECS: u64 = 300;

/// GitHub contents API listing Docker's official library images
pub const OFFICIAL_IMAGES_URL: &str =
    "https://api.github.com/repos/docker-library/official-images/contents/library";

/// Enrollment flag label ("true"/"false")
pub const ENABLED_LABEL: &str = "drydock.enabled";

/// Explicit base image label (`image[:tag]`)
pub const BASE_IMAGE_LABEL: &str = "drydock.base";

/// Marks drydock's own container so self-updates are sequenced last
pub const INSTANCE_LABEL: &str = "drydock.instance";

/// Tag-check strategy label (`semver` or `regex:<pattern>`)
pub const TAG_STRATEGY_LABEL: &str = "drydock.tags.strategy";

/// Optional regex label; only matching tags are considered
pub const TAG_KEEP_LABEL: &str = "drydock.tags.keep";

/// Optional regex label; matching tags are dropped
pub const TAG_IGNORE_LABEL: &str = "drydock.tags.ignore";

/// Marker label on disposable helper containers, used for crash-recovery cleanup
pub const HELPER_MARKER_LABEL: &str = "drydock-helper-container";

/// Parsed default configuration (built once at first access)
static DEFAULT_CONFIG: OnceLock<Config> = OnceLock::new();

/// Whether containers must opt in to update detection or are enrolled by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentMode {
    /// Only containers labeled `drydock.enabled=true` participate
    #[default]
    OptIn,
    /// Containers participate unless labeled `drydock.enabled=false`
    OptOut,
}

impl<'de> serde::Deserialize<'de> for EnrollmentMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for EnrollmentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opt-in" => Ok(EnrollmentMode::OptIn),
            "opt-out" => Ok(EnrollmentMode::OptOut),
            _ => Err(format!(
                "unknown enrollment mode `{}`, expected `opt-in` or `opt-out`",
                s
            )),
        }
    }
}

/// How to treat base images that exist locally but are stale on the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BaseImageStrategy {
    /// Pull base images only when they are not present locally.
    /// A stale local base is reported as-is, never refreshed.
    #[default]
    OnlyPullUnknown,
    /// Additionally pull fresh copies of outdated base images before the
    /// layer comparison runs.
    PullAndUpdate,
}

impl BaseImageStrategy {
    pub fn updates_outdated(&self) -> bool {
        matches!(self, BaseImageStrategy::PullAndUpdate)
    }
}

impl<'de> serde::Deserialize<'de> for BaseImageStrategy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for BaseImageStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "only-pull-unknown" => Ok(BaseImageStrategy::OnlyPullUnknown),
            "pull-and-update" => Ok(BaseImageStrategy::PullAndUpdate),
            _ => Err(format!(
                "unknown base image strategy `{}`, expected `only-pull-unknown` or `pull-and-update`",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub updater: UpdaterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub enrollment: EnrollmentMode,
    #[serde(default)]
    pub base_image_strategy: BaseImageStrategy,
    /// Seconds between check cycles; richer scheduling belongs to the driver
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Re-notify updates that were already reported in a previous cycle
    #[serde(default)]
    pub always_notify: bool,
}

fn default_interval_secs() -> u64 {
    21_600 // four cycles a day
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            enrollment: EnrollmentMode::default(),
            base_image_strategy: BaseImageStrategy::default(),
            interval_secs: default_interval_secs(),
            always_notify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistrySettings {
    /// Path to a docker config.json with registry credentials.
    /// Defaults to ~/.docker/config.json when present.
    #[serde(default)]
    pub docker_config_path: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Image the disposable helper container runs
    #[serde(default = "default_updater_image")]
    pub image: String,
    /// Entrypoint prepended to the rebuilt container names
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Bind mounts in `source:dest` form handed to the helper container
    #[serde(default)]
    pub mounts: Vec<String>,
    /// Rebuild every detected update at the end of a cycle instead of
    /// waiting for an interactive trigger
    #[serde(default)]
    pub auto_rebuild: bool,
}

fn default_updater_image() -> String {
    "docker".to_string()
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        UpdaterConfig {
            image: default_updater_image(),
            entrypoint: None,
            mounts: Vec::new(),
            auto_rebuild: false,
        }
    }
}

impl UpdaterConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for mount in &self.mounts {
            if mount.splitn(2, ':').count() != 2 || mount.ends_with(':') {
                return Err(format!(
                    "mount `{}` did not conform to `source:dest` format",
                    mount
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Build the default configuration directly in Rust code (no TOML parsing)
    fn build_default() -> Config {
        Config {
            check: CheckConfig::default(),
            registry: RegistrySettings {
                docker_config_path: None,
                http_timeout_secs: default_http_timeout_secs(),
            },
            updater: UpdaterConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| DrydockError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.updater.validate().map_err(DrydockError::Config)
    }

    /// Get the default configuration (built in Rust code, cached in OnceLock)
    pub(crate) fn default_parsed() -> &'static Config {
        DEFAULT_CONFIG.get_or_init(Self::build_default)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_parsed().clone()
    }
}
