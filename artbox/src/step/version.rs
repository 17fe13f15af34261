//! External tool versions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder that means "whatever the endpoint serves right now".
pub const LATEST: &str = "latest";

/// Version of an external tool fetched by the pipeline.
///
/// `Latest` is never resolved to a concrete version. Artifacts produced from
/// it are flagged as floating in the image manifest because two runs may
/// install different bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolVersion {
    Pinned(String),
    #[default]
    Latest,
}

impl ToolVersion {
    pub fn pinned(version: impl Into<String>) -> Self {
        ToolVersion::Pinned(version.into())
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, ToolVersion::Latest)
    }

    /// Value substituted for `{version}` in download URL templates.
    pub fn as_str(&self) -> &str {
        match self {
            ToolVersion::Pinned(v) => v,
            ToolVersion::Latest => LATEST,
        }
    }

    /// Render a URL template, replacing every `{version}` occurrence.
    pub fn render(&self, template: &str) -> String {
        template.replace("{version}", self.as_str())
    }
}

impl From<String> for ToolVersion {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(LATEST) {
            ToolVersion::Latest
        } else {
            ToolVersion::Pinned(trimmed.to_string())
        }
    }
}

impl From<ToolVersion> for String {
    fn from(value: ToolVersion) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
