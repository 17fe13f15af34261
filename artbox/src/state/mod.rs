//! Environment state threaded through every step.
//!
//! The state is the only channel between steps: a step reads it, performs
//! its effects, and reports a [`StepOutput`]. The executor folds that output
//! back into the state only after the step succeeded.

mod artifact;
mod image;

pub use artifact::{Artifact, ArtifactKind};
pub use image::{Image, ImageContents};

use crate::pipeline::Phase;
use artbox_shared::{ArtboxError, ArtboxResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Non-privileged runtime principal of the finished image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Mutations produced by one successful step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub packages_added: Vec<String>,
    pub packages_removed: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub trust_anchors: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    pub identity: Option<Identity>,
    /// Description of a non-reproducible input this step consumed.
    pub floating: Option<String>,
}

impl StepOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentState {
    root: PathBuf,
    context: PathBuf,
    base_image: String,
    packages: BTreeSet<String>,
    trust_anchors: BTreeSet<PathBuf>,
    artifacts: BTreeMap<PathBuf, Artifact>,
    env: BTreeMap<String, String>,
    workdir: PathBuf,
    phase: Phase,
    floating: BTreeSet<String>,
}

impl EnvironmentState {
    /// State for provisioning the filesystem at `root`, copying inputs from
    /// the build `context` directory.
    pub fn new(root: impl Into<PathBuf>, context: impl Into<PathBuf>) -> Self {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
        env.insert("HOME".to_string(), "/root".to_string());

        Self {
            root: root.into(),
            context: context.into(),
            base_image: String::new(),
            packages: BTreeSet::new(),
            trust_anchors: BTreeSet::new(),
            artifacts: BTreeMap::new(),
            env,
            workdir: PathBuf::from("/"),
            phase: Phase::Privileged,
            floating: BTreeSet::new(),
        }
    }

    pub fn with_base_image(mut self, base_image: impl Into<String>) -> Self {
        self.base_image = base_image.into();
        self
    }

    /// Seed packages known to be present in the base image.
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root that child processes are chrooted into; `None` when provisioning
    /// the live system.
    pub fn confinement(&self) -> Option<&Path> {
        (self.root != Path::new("/")).then_some(self.root.as_path())
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn packages(&self) -> &BTreeSet<String> {
        &self.packages
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn floating(&self) -> &BTreeSet<String> {
        &self.floating
    }

    /// Trust anchors installed so far, as host paths.
    pub fn trust_anchor_files(&self) -> ArtboxResult<Vec<PathBuf>> {
        self.trust_anchors.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn trust_anchors(&self) -> &BTreeSet<PathBuf> {
        &self.trust_anchors
    }

    /// Map an image path to the host path under the provisioning root.
    ///
    /// Relative paths are taken from the current working directory.
    /// Parent-directory components are rejected so no step can write
    /// outside the root.
    pub fn resolve(&self, image_path: &Path) -> ArtboxResult<PathBuf> {
        let absolute = if image_path.is_absolute() {
            image_path.to_path_buf()
        } else {
            self.workdir.join(image_path)
        };

        let mut resolved = self.root.clone();
        for component in absolute.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ArtboxError::Storage(format!(
                        "Image path escapes the provisioning root: {}",
                        image_path.display()
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Path of an input file inside the build context.
    pub fn context_path(&self, relative: &Path) -> PathBuf {
        self.context.join(relative)
    }

    /// Directories of the `PATH` variable, in lookup order.
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.var("PATH")
            .unwrap_or(DEFAULT_PATH)
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Fold the output of a successful step into the state.
    pub fn apply(&mut self, output: StepOutput) -> ArtboxResult<()> {
        if let Some(identity) = output.identity {
            let home = identity.home.display().to_string();
            let user = identity.user.clone();
            self.phase.drop_to(identity)?;
            self.env.insert("HOME".to_string(), home);
            self.env.insert("USER".to_string(), user);
        }

        for name in output.packages_removed {
            self.packages.remove(&name);
        }
        self.packages.extend(output.packages_added);

        self.trust_anchors.extend(output.trust_anchors);
        for artifact in output.artifacts {
            self.artifacts.insert(artifact.path.clone(), artifact);
        }
        for (name, value) in output.env {
            self.env.insert(name, value);
        }
        if let Some(workdir) = output.workdir {
            self.workdir = workdir;
        }
        if let Some(floating) = output.floating {
            self.floating.insert(floating);
        }
        Ok(())
    }
}
