//! Image manifest produced by a successful run.

use super::{Artifact, ArtifactKind, EnvironmentState, Identity};
use crate::pipeline::PipelineMetrics;
use crate::util::write_atomic;
use artbox_shared::ArtboxResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Description of a provisioned image.
///
/// Only produced when every step succeeded; there is no partial image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub base_image: String,
    pub packages: Vec<String>,
    pub trust_anchors: Vec<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub env: BTreeMap<String, String>,
    pub workdir: PathBuf,
    /// Final runtime principal; `None` if the pipeline never dropped privilege.
    pub identity: Option<Identity>,
    /// Inputs taken from a floating `latest` placeholder.
    pub floating: Vec<String>,
    pub metrics: PipelineMetrics,
}

/// Run-independent view of an [`Image`] used for reproducibility checks.
///
/// Run id, timestamps and timings are dropped; digests of floating
/// artifacts are blanked since their bytes legitimately vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContents {
    pub base_image: String,
    pub packages: Vec<String>,
    pub trust_anchors: Vec<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub env: BTreeMap<String, String>,
    pub workdir: PathBuf,
    pub identity: Option<Identity>,
    pub floating: Vec<String>,
}

impl Image {
    pub(crate) fn from_state(
        state: &EnvironmentState,
        run_id: String,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            base_image: state.base_image().to_string(),
            packages: state.packages().iter().cloned().collect(),
            trust_anchors: state.trust_anchors().iter().cloned().collect(),
            artifacts: state.artifacts().cloned().collect(),
            env: state.env().clone(),
            workdir: state.workdir().to_path_buf(),
            identity: state.phase().identity().cloned(),
            floating: state.floating().iter().cloned().collect(),
            metrics,
        }
    }

    pub fn contents(&self) -> ImageContents {
        ImageContents {
            base_image: self.base_image.clone(),
            packages: self.packages.clone(),
            trust_anchors: self.trust_anchors.clone(),
            artifacts: self
                .artifacts
                .iter()
                .map(|artifact| {
                    let mut artifact = artifact.clone();
                    if artifact.floating {
                        artifact.sha256.clear();
                    }
                    artifact
                })
                .collect(),
            env: self.env.clone(),
            workdir: self.workdir.clone(),
            identity: self.identity.clone(),
            floating: self.floating.clone(),
        }
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p == name)
    }

    pub fn artifact(&self, path: &Path) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// First binary named `name` found along the image's `PATH`.
    pub fn binary_on_path(&self, name: &str) -> Option<&Artifact> {
        let path_var = self.env.get("PATH")?;
        path_var
            .split(':')
            .filter(|dir| !dir.is_empty())
            .find_map(|dir| {
                let candidate = Path::new(dir).join(name);
                self.artifacts
                    .iter()
                    .find(|a| a.kind == ArtifactKind::Binary && a.path == candidate)
            })
    }

    /// Persist the manifest as pretty-printed JSON.
    pub fn write_manifest(&self, path: &Path) -> ArtboxResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json, 0o644)
    }

    pub fn load_manifest(path: &Path) -> ArtboxResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StepOutput;
    use tempfile::TempDir;

    fn image_with(artifacts: Vec<Artifact>, run_id: &str) -> Image {
        let mut state = EnvironmentState::new("/r", "/c").with_base_image("ubi9");
        state
            .apply(StepOutput {
                artifacts,
                ..StepOutput::default()
            })
            .unwrap();
        Image::from_state(&state, run_id.to_string(), PipelineMetrics::default())
    }

    #[test]
    fn test_binary_on_path() {
        let image = image_with(
            vec![
                Artifact::new("/usr/local/bin/oc", ArtifactKind::Binary, "aa"),
                Artifact::new("/opt/unlisted/tool", ArtifactKind::Binary, "bb"),
            ],
            "run-1",
        );
        assert!(image.binary_on_path("oc").is_some());
        assert!(image.binary_on_path("tool").is_none());
    }

    #[test]
    fn test_contents_ignore_run_identity_and_floating_digests() {
        let a = image_with(
            vec![
                Artifact::new("/usr/local/bin/oc", ArtifactKind::Binary, "aa").floating(true),
                Artifact::new("/etc/krb5.conf", ArtifactKind::Config, "cc"),
            ],
            "run-1",
        );
        let b = image_with(
            vec![
                Artifact::new("/usr/local/bin/oc", ArtifactKind::Binary, "zz").floating(true),
                Artifact::new("/etc/krb5.conf", ArtifactKind::Config, "cc"),
            ],
            "run-2",
        );
        assert_eq!(a.contents(), b.contents());

        let c = image_with(
            vec![Artifact::new("/etc/krb5.conf", ArtifactKind::Config, "dd")],
            "run-3",
        );
        assert_ne!(a.contents(), c.contents());
    }

    #[test]
    fn test_manifest_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.json");
        let image = image_with(
            vec![Artifact::new("/etc/krb5.conf", ArtifactKind::Config, "cc")],
            "run-1",
        );
        image.write_manifest(&path).unwrap();

        let loaded = Image::load_manifest(&path).unwrap();
        assert_eq!(loaded.contents(), image.contents());
        assert_eq!(loaded.run_id, "run-1");
    }
}
