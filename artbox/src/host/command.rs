//! Child process execution.

use artbox_shared::{ArtboxError, ArtboxResult};
use async_trait::async_trait;
use nix::unistd::{Gid, Uid, chdir, chroot, setgid, setgroups, setuid};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// A fully described command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Host path the child starts in. Must lie under `root` when one is set.
    pub cwd: Option<PathBuf>,
    /// Variables layered on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Run as this uid instead of the current user.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Host directory the child is chrooted into before it starts.
    pub root: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Run as `(uid, gid)`, or as the current user for `None`.
    pub fn user(mut self, user: Option<(u32, u32)>) -> Self {
        self.uid = user.map(|(uid, _)| uid);
        self.gid = user.map(|(_, gid)| gid);
        self
    }

    pub fn root(mut self, root: Option<&Path>) -> Self {
        self.root = root.map(Path::to_path_buf);
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an install-script error carrying stderr
    /// verbatim.
    pub fn check(self, program: &str) -> ArtboxResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ArtboxError::InstallScript {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs commands for steps. Returns `Err` only if the process could not be
/// started; exit status is reported through [`CommandOutput`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> ArtboxResult<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> ArtboxResult<CommandOutput> {
        let program = match &spec.root {
            Some(_) => PathBuf::from(&spec.program),
            None => resolve_program(&spec.program, spec.cwd.as_deref()),
        };
        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &spec.root {
            Some(root) => confine(&mut cmd, root, spec)?,
            None => {
                if let Some(cwd) = &spec.cwd {
                    cmd.current_dir(cwd);
                }
                if let Some(gid) = spec.gid {
                    cmd.gid(gid);
                }
                if let Some(uid) = spec.uid {
                    cmd.uid(uid);
                }
            }
        }

        tracing::debug!(
            command = %spec.display(),
            cwd = ?spec.cwd,
            root = ?spec.root,
            "Spawning command"
        );

        let output = cmd.output().await.map_err(|e| {
            let err_msg = format!("failed to start {}: {}", program.display(), e);
            tracing::error!("{}", err_msg);
            ArtboxError::InstallScript {
                program: spec.program.clone(),
                code: None,
                stderr: err_msg,
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        for line in stdout.lines() {
            tracing::debug!(program = %spec.program, "stdout: {}", line);
        }
        for line in stderr.lines() {
            tracing::debug!(program = %spec.program, "stderr: {}", line);
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

/// Chroot the child into `root`, enter the working directory as seen from
/// inside it, then drop to the requested user.
///
/// Credentials are switched inside the hook: `Command::uid` is applied
/// before pre-exec hooks, after which chroot is no longer permitted.
fn confine(
    cmd: &mut tokio::process::Command,
    root: &Path,
    spec: &CommandSpec,
) -> ArtboxResult<()> {
    let image_cwd = match &spec.cwd {
        Some(cwd) => image_path(root, cwd)?,
        None => PathBuf::from("/"),
    };
    let root_c = c_path(root)?;
    let cwd_c = c_path(&image_cwd)?;
    let uid = spec.uid.map(Uid::from_raw);
    let gid = spec.gid.map(Gid::from_raw);

    // SAFETY: the hook runs between fork and exec. It only issues syscalls
    // on strings allocated before the fork.
    unsafe {
        cmd.pre_exec(move || {
            chroot(root_c.as_c_str())?;
            chdir(cwd_c.as_c_str())?;
            if uid.is_some() {
                let groups: &[Gid] = match &gid {
                    Some(gid) => std::slice::from_ref(gid),
                    None => &[],
                };
                setgroups(groups)?;
            }
            if let Some(gid) = gid {
                setgid(gid)?;
            }
            if let Some(uid) = uid {
                setuid(uid)?;
            }
            Ok(())
        });
    }
    Ok(())
}

/// `host` as seen from inside `root`.
fn image_path(root: &Path, host: &Path) -> ArtboxResult<PathBuf> {
    host.strip_prefix(root)
        .map(|rel| Path::new("/").join(rel))
        .map_err(|_| {
            ArtboxError::Storage(format!(
                "working directory {} is outside the root {}",
                host.display(),
                root.display()
            ))
        })
}

fn c_path(path: &Path) -> ArtboxResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ArtboxError::Storage(format!("path {} contains NUL", path.display())))
}

/// Relative paths such as `./install.sh` are taken from the child's working
/// directory, not ours.
fn resolve_program(program: &str, cwd: Option<&Path>) -> PathBuf {
    let path = Path::new(program);
    match cwd {
        Some(cwd) if program.contains('/') && path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    }
}
