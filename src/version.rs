//! Tag string parsing for the version-upgrade check.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use semver::{BuildMetadata, Version};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VersionParseError {
    #[error("unknown parser type: {0}")]
    UnknownStrategy(String),

    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),

    #[error("version string '{0}' does not match the expected format")]
    NoMatch(String),

    #[error("missing required version component '{0}'")]
    MissingComponent(&'static str),

    #[error("invalid number in version component: {0}")]
    InvalidNumber(String),
}

fn coerce_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[vV]?(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static pattern"))
}

/// How a tag string turns into an orderable version.
#[derive(Debug, Clone)]
pub enum VersionStrategy {
    /// Lenient semver: optional `v` prefix, missing minor/patch read as 0.
    Semver,
    /// Operator-supplied pattern with named groups `major`, `minor`, `patch`
    /// and optionally `build`. The pattern must match the whole tag.
    Pattern(Regex),
}

impl FromStr for VersionStrategy {
    type Err = VersionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "semver" {
            return Ok(VersionStrategy::Semver);
        }
        let pattern = raw
            .strip_prefix("regex:")
            .ok_or_else(|| VersionParseError::UnknownStrategy(raw.to_string()))?;

        let anchored = format!("^(?:{})$", pattern);
        let compiled = Regex::new(&anchored)
            .map_err(|e| VersionParseError::InvalidPattern(e.to_string()))?;

        for group in ["major", "minor", "patch"] {
            if !compiled.capture_names().flatten().any(|name| name == group) {
                return Err(VersionParseError::MissingComponent(group));
            }
        }

        Ok(VersionStrategy::Pattern(compiled))
    }
}

impl VersionStrategy {
    pub fn parse(&self, tag: &str) -> Result<Version, VersionParseError> {
        match self {
            VersionStrategy::Semver => coerce(tag),
            VersionStrategy::Pattern(regex) => {
                let captures = regex
                    .captures(tag)
                    .ok_or_else(|| VersionParseError::NoMatch(tag.to_string()))?;

                let mut version = Version::new(
                    named_number(&captures, "major")?,
                    named_number(&captures, "minor")?,
                    named_number(&captures, "patch")?,
                );
                if let Some(build) = captures.name("build") {
                    version.build = BuildMetadata::new(build.as_str())
                        .map_err(|_| VersionParseError::InvalidNumber(build.as_str().to_string()))?;
                }
                Ok(version)
            }
        }
    }
}

fn coerce(tag: &str) -> Result<Version, VersionParseError> {
    let captures = coerce_pattern()
        .captures(tag)
        .ok_or_else(|| VersionParseError::NoMatch(tag.to_string()))?;

    let part = |idx: usize| -> Result<u64, VersionParseError> {
        match captures.get(idx) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| VersionParseError::InvalidNumber(m.as_str().to_string())),
            None => Ok(0),
        }
    };

    Ok(Version::new(part(1)?, part(2)?, part(3)?))
}

fn named_number(
    captures: &regex::Captures<'_>,
    name: &'static str,
) -> Result<u64, VersionParseError> {
    let group = captures
        .name(name)
        .ok_or(VersionParseError::MissingComponent(name))?;
    group
        .as_str()
        .parse()
        .map_err(|_| VersionParseError::InvalidNumber(group.as_str().to_string()))
}
