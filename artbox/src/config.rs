//! Provisioning configuration.
//!
//! Loaded from a JSON file. Paths inside the image are absolute; paths to
//! inputs (`repositories`, `application.source`, `kerberos.src`) are
//! relative to the build context.

use crate::step::{DEFAULT_ANCHOR_DIR, DEFAULT_REPO_DIR, ToolVersion};
use artbox_shared::{ArtboxError, ArtboxResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Tool names whose step would collide with a fixed recipe step.
const RESERVED_TOOL_NAMES: &[&str] = &["packages", "runtime", "application"];

/// Highest uid accepted for the runtime identity.
pub const MAX_UID: u32 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Identity of the base image the root was created from.
    pub base_image: String,

    /// Internal certificate authorities.
    #[serde(default)]
    pub trust: Option<TrustConfig>,

    /// Repository definition files, relative to the build context.
    #[serde(default)]
    pub repositories: Vec<PathBuf>,

    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    #[serde(default)]
    pub packages: PackagesConfig,

    /// Language runtime that replaces conflicting distro packages.
    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,

    /// External CLI tools.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,

    /// Where fetched and built binaries land. Prepended to `PATH`.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    #[serde(default)]
    pub application: Option<ApplicationConfig>,

    /// Security scanner built from source.
    #[serde(default)]
    pub scanner: Option<ScannerConfig>,

    #[serde(default)]
    pub kerberos: Option<KerberosConfig>,

    #[serde(default)]
    pub identity: Option<IdentityConfig>,

    /// Variables set after the identity drop.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Final working directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    pub anchors: Vec<AnchorConfig>,

    #[serde(default = "default_anchor_dir")]
    pub anchor_dir: PathBuf,

    /// Command regenerating the consolidated bundle.
    #[serde(default = "default_refresh")]
    pub refresh: Vec<String>,

    /// Hosts only reachable once the anchors are trusted.
    #[serde(default)]
    pub secures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorConfig {
    pub url: String,
    pub file_name: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagesConfig {
    #[serde(default)]
    pub install: Vec<String>,
    /// Removed before anything is installed.
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub packages: Vec<String>,
    /// Distro packages that must be gone before `packages` go in.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Installed file name for single-file tools.
    pub name: String,
    #[serde(default)]
    pub version: ToolVersion,
    /// May contain `{version}`.
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Archive members to install. Empty means `url` is the binary itself.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    pub source: PathBuf,
    pub dest: PathBuf,
    /// Install entry point, run from `dest` with no arguments.
    #[serde(default = "default_install")]
    pub install: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScannerConfig {
    pub name: String,
    pub repo: String,
    pub git_ref: String,
    pub build: Vec<String>,
    /// Produced binary, relative to the checkout.
    pub artifact: PathBuf,
    /// Packages the build needs; must be installed by an earlier step or
    /// present in the base image.
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KerberosConfig {
    pub src: PathBuf,
    #[serde(default = "default_krb5_dest")]
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub user: String,
    pub uid: u32,
    /// Primary group id. Defaults to the uid.
    #[serde(default)]
    pub gid: Option<u32>,
    /// Defaults to `/home/<user>`.
    #[serde(default)]
    pub home: Option<PathBuf>,
}

impl IdentityConfig {
    pub fn gid(&self) -> u32 {
        self.gid.unwrap_or(self.uid)
    }

    pub fn home(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| Path::new("/home").join(&self.user))
    }
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPO_DIR)
}

fn default_anchor_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ANCHOR_DIR)
}

fn default_refresh() -> Vec<String> {
    vec!["update-ca-trust".to_string(), "extract".to_string()]
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

fn default_install() -> String {
    "./install.sh".to_string()
}

fn default_krb5_dest() -> PathBuf {
    PathBuf::from("/etc/krb5.conf")
}

impl ProvisionConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> ArtboxResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArtboxError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content).map_err(|e| {
            ArtboxError::Config(format!("{}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "Loaded provisioning config");
        Ok(config)
    }

    pub fn from_json(content: &str) -> ArtboxResult<Self> {
        let config: ProvisionConfig = serde_json::from_str(content)
            .map_err(|e| ArtboxError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field-level constraints. Ordering constraints between the
    /// resulting steps are checked when the pipeline is built.
    pub fn validate(&self) -> ArtboxResult<()> {
        let mut problems = Vec::new();

        if self.base_image.trim().is_empty() {
            problems.push("base_image is empty".to_string());
        }
        require_absolute(&mut problems, "repo_dir", &self.repo_dir);
        require_absolute(&mut problems, "bin_dir", &self.bin_dir);

        if let Some(trust) = &self.trust {
            if trust.anchors.is_empty() {
                problems.push("trust.anchors is empty".to_string());
            }
            require_absolute(&mut problems, "trust.anchor_dir", &trust.anchor_dir);
            for anchor in &trust.anchors {
                require_url(&mut problems, "trust.anchors.url", &anchor.url);
                require_file_name(&mut problems, "trust.anchors.file_name", &anchor.file_name);
                require_sha256(&mut problems, &anchor.url, anchor.sha256.as_deref());
            }
        }

        for name in self.packages.install.iter().chain(&self.packages.remove) {
            if name.trim().is_empty() || name.contains(char::is_whitespace) {
                problems.push(format!("invalid package name '{}'", name));
            }
        }

        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            require_file_name(&mut problems, "tools.name", &tool.name);
            if !tool_names.insert(tool.name.as_str()) {
                problems.push(format!("tool '{}' is declared twice", tool.name));
            }
            if RESERVED_TOOL_NAMES.contains(&tool.name.as_str()) {
                problems.push(format!(
                    "tool name '{}' clashes with the install-{} step",
                    tool.name, tool.name
                ));
            }
            require_url(&mut problems, "tools.url", &tool.version.render(&tool.url));
            require_sha256(&mut problems, &tool.name, tool.sha256.as_deref());
            if tool.sha256.is_some() && tool.version.is_floating() {
                problems.push(format!(
                    "tool '{}' pins a sha256 but floats on 'latest'",
                    tool.name
                ));
            }
        }

        if let Some(app) = &self.application {
            require_relative(&mut problems, "application.source", &app.source);
            require_absolute(&mut problems, "application.dest", &app.dest);
            if app.install.trim().is_empty() {
                problems.push("application.install is empty".to_string());
            }
        }

        if let Some(scanner) = &self.scanner {
            require_file_name(&mut problems, "scanner.name", &scanner.name);
            if scanner.git_ref.trim().is_empty() {
                problems.push("scanner.git_ref is empty".to_string());
            }
            if scanner.build.is_empty() {
                problems.push("scanner.build is empty".to_string());
            }
            require_relative(&mut problems, "scanner.artifact", &scanner.artifact);
        }

        if let Some(krb5) = &self.kerberos {
            require_relative(&mut problems, "kerberos.src", &krb5.src);
            require_absolute(&mut problems, "kerberos.dest", &krb5.dest);
        }

        if let Some(identity) = &self.identity {
            if identity.user.is_empty()
                || !identity
                    .user
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                problems.push(format!("invalid user name '{}'", identity.user));
            }
            if identity.uid == 0 || identity.uid > MAX_UID {
                problems.push(format!(
                    "identity.uid {} is outside 1..={}",
                    identity.uid, MAX_UID
                ));
            }
            if identity.gid() == 0 || identity.gid() > MAX_UID {
                problems.push(format!(
                    "identity.gid {} is outside 1..={}",
                    identity.gid(),
                    MAX_UID
                ));
            }
            require_absolute(&mut problems, "identity.home", &identity.home());
        }

        let mut env_steps = HashSet::new();
        for name in self.env.keys() {
            if name.is_empty() || name.contains('=') {
                problems.push(format!("invalid environment variable name '{}'", name));
            }
            if !env_steps.insert(name.to_ascii_lowercase()) {
                problems.push(format!(
                    "env '{}' differs from another variable only in case",
                    name
                ));
            }
        }
        if let Some(workdir) = &self.workdir {
            require_absolute(&mut problems, "workdir", workdir);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ArtboxError::Config(problems.join("; ")))
        }
    }
}

fn require_absolute(problems: &mut Vec<String>, field: &str, path: &Path) {
    if !path.is_absolute() {
        problems.push(format!("{} must be absolute: {}", field, path.display()));
    }
}

fn require_relative(problems: &mut Vec<String>, field: &str, path: &Path) {
    if path.as_os_str().is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        problems.push(format!(
            "{} must be a relative path inside the build context: {}",
            field,
            path.display()
        ));
    }
}

fn require_file_name(problems: &mut Vec<String>, field: &str, name: &str) {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        problems.push(format!("{} is not a file name: '{}'", field, name));
    }
}

fn require_url(problems: &mut Vec<String>, field: &str, url: &str) {
    if let Err(e) = reqwest::Url::parse(url) {
        problems.push(format!("{} '{}' is not a URL: {}", field, url, e));
    }
}

fn require_sha256(problems: &mut Vec<String>, what: &str, sha256: Option<&str>) {
    if let Some(sha) = sha256
        && (sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()))
    {
        problems.push(format!("sha256 for {} is not 64 hex digits", what));
    }
}
