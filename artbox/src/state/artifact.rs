//! Files placed into the image by steps.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Executable placed on the search path.
    Binary,
    TrustAnchor,
    Config,
    File,
    /// Directory tree; digest covers relative paths and file contents.
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute path inside the image.
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub sha256: String,
    /// Produced from a `latest` placeholder; contents may differ per run.
    #[serde(default)]
    pub floating: bool,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind, sha256: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            sha256: sha256.into(),
            floating: false,
        }
    }

    pub fn floating(mut self, floating: bool) -> Self {
        self.floating = floating;
        self
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}
