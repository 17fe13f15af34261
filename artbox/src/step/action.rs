//! Action kinds and their parameters.
//!
//! Paths named `dest`, `dest_dir`, `workdir` or `anchor_dir` are absolute
//! paths inside the image. Paths named `src` or listed in repository `files`
//! are relative to the build context.

use super::ToolVersion;
use crate::state::ArtifactKind;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_ANCHOR_DIR: &str = "/etc/pki/ca-trust/source/anchors";
pub const DEFAULT_REPO_DIR: &str = "/etc/yum.repos.d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    TrustAnchors(TrustAnchors),
    ConfigureRepositories(RepositoryFiles),
    InstallPackages(PackageSet),
    FetchResource(FetchResource),
    ExtractArchive(ExtractArchive),
    CopyFile(CopyFile),
    CopyTree(CopyTree),
    RunScript(RunScript),
    BuildFromSource(SourceBuild),
    SetEnv(SetEnv),
    SetWorkdir(PathBuf),
    CreateIdentity(IdentitySpec),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::TrustAnchors(_) => "trust_anchors",
            Action::ConfigureRepositories(_) => "configure_repositories",
            Action::InstallPackages(_) => "install_packages",
            Action::FetchResource(_) => "fetch_resource",
            Action::ExtractArchive(_) => "extract_archive",
            Action::CopyFile(_) => "copy_file",
            Action::CopyTree(_) => "copy_tree",
            Action::RunScript(_) => "run_script",
            Action::BuildFromSource(_) => "build_from_source",
            Action::SetEnv(_) => "set_env",
            Action::SetWorkdir(_) => "set_workdir",
            Action::CreateIdentity(_) => "create_identity",
        }
    }
}

/// One certificate authority to trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSource {
    pub url: String,
    /// File name under the anchor directory.
    pub file_name: String,
    pub sha256: Option<String>,
}

/// Install CA certificates into the image trust store and refresh it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    pub anchors: Vec<AnchorSource>,
    pub anchor_dir: PathBuf,
    /// Command regenerating the consolidated trust bundle, e.g.
    /// `update-ca-trust extract`. Empty skips the refresh.
    pub refresh: Vec<String>,
    /// Hosts whose certificate chains depend on these anchors.
    pub secures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFiles {
    pub files: Vec<PathBuf>,
    pub dest_dir: PathBuf,
}

/// Packages to converge the package database to. Removals run first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    pub install: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResource {
    pub url: String,
    pub dest: PathBuf,
    pub sha256: Option<String>,
    pub mode: u32,
    pub version: ToolVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Url { url: String, sha256: Option<String> },
    /// Archive already present in the image.
    Path(PathBuf),
}

/// Install selected members of a tar archive (optionally gzip-compressed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractArchive {
    pub source: ArchiveSource,
    /// Member paths as stored in the archive; each lands in `dest_dir`
    /// under its file name.
    pub members: Vec<String>,
    pub dest_dir: PathBuf,
    pub version: ToolVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFile {
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Permission bits; `None` keeps the source file's mode.
    pub mode: Option<u32>,
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTree {
    pub src: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScript {
    pub program: String,
    pub args: Vec<String>,
    /// Falls back to the current working directory of the state.
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub privileged: bool,
}

impl RunScript {
    /// Privileged invocation of `program` with no arguments.
    pub fn entry_point(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
            privileged: true,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }
}

/// Clone, build, keep one binary, discard the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBuild {
    pub repo: String,
    pub git_ref: String,
    pub build: Vec<String>,
    /// Path of the produced binary relative to the checkout.
    pub artifact: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvOp {
    Set,
    /// Prepend to a `:`-separated list such as `PATH`.
    Prepend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEnv {
    pub name: String,
    pub value: String,
    pub op: EnvOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySpec {
    pub user: String,
    pub uid: u32,
    /// Primary group, created when the root has no group with this id.
    pub gid: u32,
    pub home: PathBuf,
}
