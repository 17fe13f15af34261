//! Tasks: Environment variables and working directory.

use crate::state::{EnvironmentState, StepOutput};
use crate::step::{EnvOp, SetEnv};
use crate::util::create_dir_owned;
use artbox_shared::{ArtboxError, ArtboxResult};
use std::path::Path;

pub(super) fn run_set_env(env: &SetEnv, state: &EnvironmentState) -> ArtboxResult<StepOutput> {
    if env.name.is_empty() || env.name.contains('=') {
        return Err(ArtboxError::Config(format!(
            "invalid environment variable name '{}'",
            env.name
        )));
    }

    let value = match env.op {
        EnvOp::Set => env.value.clone(),
        EnvOp::Prepend => prepend(state.var(&env.name), &env.value),
    };
    tracing::info!(name = %env.name, value = %value, "Setting environment variable");

    Ok(StepOutput {
        env: vec![(env.name.clone(), value)],
        ..StepOutput::default()
    })
}

/// `value`'s entries first, then existing entries not already listed.
fn prepend(existing: Option<&str>, value: &str) -> String {
    let mut entries: Vec<&str> = Vec::new();
    for entry in value.split(':').chain(existing.unwrap_or("").split(':')) {
        if !entry.is_empty() && !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries.join(":")
}

pub(super) fn run_set_workdir(dir: &Path, state: &EnvironmentState) -> ArtboxResult<StepOutput> {
    let image_path = state.workdir().join(dir);
    let host_path = state.resolve(&image_path)?;
    let owner = state
        .phase()
        .identity()
        .map(|identity| (identity.uid, identity.gid));
    create_dir_owned(&host_path, owner)?;

    Ok(StepOutput {
        workdir: Some(image_path),
        ..StepOutput::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepend_dedupes() {
        assert_eq!(
            prepend(Some("/usr/bin:/usr/local/bin"), "/usr/local/bin"),
            "/usr/local/bin:/usr/bin"
        );
        assert_eq!(prepend(None, "/opt/go/bin"), "/opt/go/bin");
    }

    #[test]
    fn test_prepend_to_path() {
        let state = EnvironmentState::new("/", "/ctx");
        let output = run_set_env(
            &SetEnv {
                name: "PATH".into(),
                value: "/opt/go/bin".into(),
                op: EnvOp::Prepend,
            },
            &state,
        )
        .unwrap();
        let (name, value) = &output.env[0];
        assert_eq!(name, "PATH");
        assert!(value.starts_with("/opt/go/bin:/usr/local/sbin"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let state = EnvironmentState::new("/", "/ctx");
        let err = run_set_env(
            &SetEnv {
                name: "A=B".into(),
                value: "x".into(),
                op: EnvOp::Set,
            },
            &state,
        )
        .unwrap_err();
        assert!(matches!(err, ArtboxError::Config(_)));
    }

    #[test]
    fn test_workdir_is_created() {
        let root = TempDir::new().unwrap();
        let state = EnvironmentState::new(root.path(), root.path());
        let output = run_set_workdir(Path::new("/home/dev/work"), &state).unwrap();
        assert_eq!(output.workdir.as_deref(), Some(Path::new("/home/dev/work")));
        assert!(root.path().join("home/dev/work").is_dir());
    }

    #[test]
    fn test_workdir_after_drop_belongs_to_runtime_identity() {
        use crate::state::Identity;
        use std::os::unix::fs::MetadataExt;

        let root = TempDir::new().unwrap();
        let mut state = EnvironmentState::new(root.path(), root.path());
        state
            .apply(StepOutput {
                identity: Some(Identity {
                    user: "dev".into(),
                    uid: 1000,
                    gid: 1000,
                    home: "/home/dev".into(),
                }),
                ..StepOutput::default()
            })
            .unwrap();

        run_set_workdir(Path::new("/home/dev/work"), &state).unwrap();

        let meta = std::fs::metadata(root.path().join("home/dev/work")).unwrap();
        if nix::unistd::geteuid().is_root() {
            assert_eq!((meta.uid(), meta.gid()), (1000, 1000));
        } else {
            assert_eq!(meta.uid(), nix::unistd::geteuid().as_raw());
        }
    }
}
