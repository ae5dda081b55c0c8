//! Image identity types.

use serde::{Deserialize, Serialize};

/// Canonical `image[:tag]` pair. The tag defaults to `latest` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageIdentifier {
    pub image: String,
    pub tag: String,
}

impl ImageIdentifier {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        ImageIdentifier {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Parses a `name[:tag]` string. A colon only counts as a tag separator
    /// when it appears after the last path segment, so registry ports
    /// (`registry:5000/app`) stay part of the image name.
    pub fn parse(raw: &str) -> Self {
        let image_start = raw.rfind('/').map(|i| i as i64).unwrap_or(-1);
        let tag_start = raw.rfind(':').map(|i| i as i64).unwrap_or(-1);

        if tag_start > image_start {
            ImageIdentifier {
                image: raw[..tag_start as usize].to_string(),
                tag: raw[tag_start as usize + 1..].to_string(),
            }
        } else {
            ImageIdentifier {
                image: raw.to_string(),
                tag: "latest".to_string(),
            }
        }
    }

    pub fn name_with_tag(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Same image, different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        ImageIdentifier {
            image: self.image.clone(),
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}
