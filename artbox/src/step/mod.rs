//! Declarative step descriptors.
//!
//! A [`Step`] is pure data: a name, an [`Action`] with its parameters, and
//! any explicit [`Capability`] requirements. What a step provides and needs
//! is derived from the action so ordering can be checked before anything
//! runs (see [`crate::pipeline::validate`]).

mod action;
mod version;

pub use action::{
    Action, AnchorSource, ArchiveSource, CopyFile, CopyTree, DEFAULT_ANCHOR_DIR,
    DEFAULT_REPO_DIR, EnvOp, ExtractArchive, FetchResource, IdentitySpec, PackageSet,
    RepositoryFiles, RunScript, SetEnv, SourceBuild, TrustAnchors,
};
pub use version::{LATEST, ToolVersion};

use std::fmt;
use std::path::{Path, PathBuf};

/// Something one step establishes and a later step may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Certificate chain for this host is trusted.
    TrustedHost(String),
    /// Package sources are configured.
    Repositories,
    Package(String),
    /// A conflicting package has been removed.
    Removed(String),
    /// Executable reachable by file name.
    Binary(String),
    /// File or directory placed at this image path.
    Path(PathBuf),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::TrustedHost(host) => write!(f, "trusted host {}", host),
            Capability::Repositories => f.write_str("package repositories"),
            Capability::Package(name) => write!(f, "package {}", name),
            Capability::Removed(name) => write!(f, "removal of package {}", name),
            Capability::Binary(name) => write!(f, "binary {}", name),
            Capability::Path(path) => write!(f, "path {}", path.display()),
        }
    }
}

/// Whether a step needs the elevated setup context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Required,
    NotRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    name: String,
    action: Action,
    requires: Vec<Capability>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
            requires: Vec::new(),
        }
    }

    /// Declare a dependency the action itself does not imply.
    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires.push(capability);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }

    pub fn privilege(&self) -> Privilege {
        match &self.action {
            Action::SetEnv(_) | Action::SetWorkdir(_) => Privilege::NotRequired,
            Action::RunScript(script) if !script.privileged => Privilege::NotRequired,
            _ => Privilege::Required,
        }
    }

    pub fn is_identity_drop(&self) -> bool {
        matches!(self.action, Action::CreateIdentity(_))
    }

    /// Whether this step installs bytes whose content may change between runs.
    pub fn is_floating(&self) -> bool {
        match &self.action {
            Action::FetchResource(fetch) => fetch.version.is_floating(),
            Action::ExtractArchive(extract) => extract.version.is_floating(),
            _ => false,
        }
    }

    pub fn provides(&self) -> Vec<Capability> {
        match &self.action {
            Action::TrustAnchors(trust) => trust
                .secures
                .iter()
                .map(|host| Capability::TrustedHost(host.to_ascii_lowercase()))
                .collect(),
            Action::ConfigureRepositories(_) => vec![Capability::Repositories],
            Action::InstallPackages(set) => set
                .remove
                .iter()
                .map(|name| Capability::Removed(name.clone()))
                .chain(set.install.iter().map(|name| Capability::Package(name.clone())))
                .collect(),
            Action::FetchResource(fetch) => {
                let mut caps = vec![Capability::Path(fetch.dest.clone())];
                if fetch.mode & 0o111 != 0
                    && let Some(name) = file_name(&fetch.dest)
                {
                    caps.push(Capability::Binary(name));
                }
                caps
            }
            Action::ExtractArchive(extract) => extract
                .members
                .iter()
                .filter_map(|member| file_name(Path::new(member)))
                .flat_map(|name| {
                    [
                        Capability::Path(extract.dest_dir.join(&name)),
                        Capability::Binary(name),
                    ]
                })
                .collect(),
            Action::CopyFile(copy) => vec![Capability::Path(copy.dest.clone())],
            Action::CopyTree(copy) => vec![Capability::Path(copy.dest.clone())],
            Action::BuildFromSource(build) => {
                let mut caps = vec![Capability::Path(build.dest.clone())];
                if let Some(name) = file_name(&build.dest) {
                    caps.push(Capability::Binary(name));
                }
                caps
            }
            Action::RunScript(_)
            | Action::SetEnv(_)
            | Action::SetWorkdir(_)
            | Action::CreateIdentity(_) => Vec::new(),
        }
    }

    /// Explicit requirements plus those implied by the action.
    pub fn requirements(&self) -> Vec<Capability> {
        let mut caps = self.requires.clone();
        match &self.action {
            Action::InstallPackages(set) if !set.install.is_empty() => {
                caps.push(Capability::Repositories);
            }
            Action::ExtractArchive(ExtractArchive {
                source: ArchiveSource::Path(path),
                ..
            }) => caps.push(Capability::Path(path.clone())),
            Action::RunScript(script) => {
                if !script.program.contains('/') {
                    caps.push(Capability::Binary(script.program.clone()));
                }
                if let Some(workdir) = &script.workdir {
                    caps.push(Capability::Path(workdir.clone()));
                }
            }
            Action::BuildFromSource(build) => {
                caps.push(Capability::Binary("git".to_string()));
                if let Some(program) = build.build.first()
                    && !program.contains('/')
                {
                    caps.push(Capability::Binary(program.clone()));
                }
            }
            _ => {}
        }
        for url in self.fetch_urls() {
            if let Some(host) = https_host(url) {
                caps.push(Capability::TrustedHost(host));
            }
        }
        caps
    }

    /// Remote URLs this step retrieves, excluding anchors a trust step fetches
    /// for itself.
    pub fn fetch_urls(&self) -> Vec<&str> {
        match &self.action {
            Action::FetchResource(fetch) => vec![fetch.url.as_str()],
            Action::ExtractArchive(ExtractArchive {
                source: ArchiveSource::Url { url, .. },
                ..
            }) => vec![url.as_str()],
            Action::BuildFromSource(build) => vec![build.repo.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn installs(&self) -> &[String] {
        match &self.action {
            Action::InstallPackages(set) => &set.install,
            _ => &[],
        }
    }

    pub fn removes(&self) -> &[String] {
        match &self.action {
            Action::InstallPackages(set) => &set.remove,
            _ => &[],
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind())
    }
}

/// Lowercased host of an `https` URL.
pub fn https_host(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch(url: &str, dest: &str, mode: u32) -> Step {
        Step::new(
            "fetch",
            Action::FetchResource(FetchResource {
                url: url.into(),
                dest: dest.into(),
                sha256: None,
                mode,
                version: ToolVersion::pinned("1.0"),
            }),
        )
    }

    #[test]
    fn test_fetch_over_https_requires_trusted_host() {
        let step = fetch("https://Certs.Example.com/x", "/usr/local/bin/x", 0o755);
        assert!(
            step.requirements()
                .contains(&Capability::TrustedHost("certs.example.com".into()))
        );
        assert!(step.provides().contains(&Capability::Binary("x".into())));

        let plain = fetch("http://mirror/x", "/etc/x.conf", 0o644);
        assert!(plain.requirements().is_empty());
        assert_eq!(plain.provides(), vec![Capability::Path("/etc/x.conf".into())]);
    }

    #[test]
    fn test_script_requirements() {
        let step = Step::new(
            "install-app",
            Action::RunScript(RunScript::entry_point("./install.sh").workdir("/opt/app")),
        );
        assert_eq!(
            step.requirements(),
            vec![Capability::Path("/opt/app".into())]
        );

        let step = Step::new("pip", Action::RunScript(RunScript::entry_point("pip3")))
            .requires(Capability::Package("python3-pip".into()));
        assert_eq!(
            step.requirements(),
            vec![
                Capability::Package("python3-pip".into()),
                Capability::Binary("pip3".into()),
            ]
        );
    }

    #[test]
    fn test_privilege_classification() {
        let env = Step::new(
            "path",
            Action::SetEnv(SetEnv {
                name: "PATH".into(),
                value: "/usr/local/bin".into(),
                op: EnvOp::Prepend,
            }),
        );
        assert_eq!(env.privilege(), Privilege::NotRequired);

        let user_script = Step::new(
            "smoke",
            Action::RunScript(RunScript::entry_point("oc").args(["version"]).unprivileged()),
        );
        assert_eq!(user_script.privilege(), Privilege::NotRequired);

        let identity = Step::new(
            "user",
            Action::CreateIdentity(IdentitySpec {
                user: "dev".into(),
                uid: 1000,
                gid: 1000,
                home: "/home/dev".into(),
            }),
        );
        assert_eq!(identity.privilege(), Privilege::Required);
        assert!(identity.is_identity_drop());
    }

    #[test]
    fn test_archive_members_provide_binaries() {
        let step = Step::new(
            "oc",
            Action::ExtractArchive(ExtractArchive {
                source: ArchiveSource::Url {
                    url: "https://mirror.example.com/oc.tar.gz".into(),
                    sha256: None,
                },
                members: vec!["oc".into(), "./bin/kubectl".into()],
                dest_dir: "/usr/local/bin".into(),
                version: ToolVersion::Latest,
            }),
        );
        let provides = step.provides();
        assert!(provides.contains(&Capability::Binary("oc".into())));
        assert!(provides.contains(&Capability::Binary("kubectl".into())));
        assert!(provides.contains(&Capability::Path("/usr/local/bin/kubectl".into())));
        assert!(step.is_floating());
    }
}
