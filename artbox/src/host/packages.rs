//! System package database access.

use super::command::{CommandRunner, CommandSpec};
use artbox_shared::{ArtboxError, ArtboxResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Package manager operating on the filesystem at `root`.
///
/// Failures are reported as [`ArtboxError::Resolution`].
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Subset of `names` currently installed.
    async fn installed(&self, root: &Path, names: &[String]) -> ArtboxResult<BTreeSet<String>>;

    async fn install(&self, root: &Path, names: &[String]) -> ArtboxResult<()>;

    async fn remove(&self, root: &Path, names: &[String]) -> ArtboxResult<()>;
}

/// `dnf` for changes, `rpm -q` for queries.
///
/// When `root` is not `/`, both tools are pointed at it with
/// `--installroot` / `--root`.
pub struct DnfPackageManager {
    runner: Arc<dyn CommandRunner>,
    dnf: String,
    rpm: String,
    install_weak_deps: bool,
}

impl DnfPackageManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            dnf: "dnf".to_string(),
            rpm: "rpm".to_string(),
            install_weak_deps: false,
        }
    }

    pub fn with_weak_deps(mut self, enabled: bool) -> Self {
        self.install_weak_deps = enabled;
        self
    }

    fn dnf(&self, root: &Path, verb: &str, names: &[String]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.dnf).arg("-y");
        if root != Path::new("/") {
            spec = spec.arg(format!("--installroot={}", root.display()));
        }
        spec.arg(format!("--setopt=install_weak_deps={}", self.install_weak_deps))
            .arg(verb)
            .args(names.iter().cloned())
    }

    async fn run_dnf(&self, root: &Path, verb: &str, names: &[String]) -> ArtboxResult<()> {
        let spec = self.dnf(root, verb, names);
        tracing::info!(command = %spec.display(), "Running package manager");
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| ArtboxError::Resolution(e.to_string()))?;
        if !output.is_success() {
            return Err(ArtboxError::Resolution(format!(
                "dnf {} {} failed ({}): {}",
                verb,
                names.join(" "),
                output
                    .code
                    .map(|c| format!("status {}", c))
                    .unwrap_or_else(|| "signal".to_string()),
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageManager for DnfPackageManager {
    async fn installed(&self, root: &Path, names: &[String]) -> ArtboxResult<BTreeSet<String>> {
        if names.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut spec = CommandSpec::new(&self.rpm).arg("-q");
        if root != Path::new("/") {
            spec = spec.arg(format!("--root={}", root.display()));
        }
        let spec = spec
            .arg("--queryformat=%{NAME}\\n")
            .args(names.iter().cloned());

        // Exit status is the number of packages not installed, so only the
        // printed names matter.
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| ArtboxError::Resolution(e.to_string()))?;
        Ok(parse_installed(&output.stdout, names))
    }

    async fn install(&self, root: &Path, names: &[String]) -> ArtboxResult<()> {
        self.run_dnf(root, "install", names).await
    }

    async fn remove(&self, root: &Path, names: &[String]) -> ArtboxResult<()> {
        self.run_dnf(root, "remove", names).await
    }
}

fn parse_installed(stdout: &str, names: &[String]) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| names.iter().any(|n| n.as_str() == *line))
        .map(str::to_string)
        .collect()
}
