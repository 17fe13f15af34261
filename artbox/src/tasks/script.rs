//! Task: Run an install routine or other script.

use crate::host::{CommandSpec, Host};
use crate::state::{EnvironmentState, StepOutput};
use crate::step::RunScript;
use artbox_shared::{ArtboxError, ArtboxResult};
use std::collections::BTreeMap;

/// Environment for a child: the accumulated image environment with `extra`
/// layered on top.
pub(super) fn command_env(
    state: &EnvironmentState,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = state.env().clone();
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// `(uid, gid)` to run as: the runtime identity once privilege has been
/// dropped.
pub(super) fn run_as(state: &EnvironmentState, privileged: bool) -> Option<(u32, u32)> {
    if privileged {
        None
    } else {
        state
            .phase()
            .identity()
            .map(|identity| (identity.uid, identity.gid))
    }
}

pub(super) async fn run_script(
    host: &Host,
    script: &RunScript,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    let workdir = script.workdir.as_deref().unwrap_or(state.workdir());
    let cwd = state.resolve(workdir)?;
    if !cwd.is_dir() {
        return Err(ArtboxError::Storage(format!(
            "working directory {} does not exist",
            workdir.display()
        )));
    }

    let spec = CommandSpec::new(&script.program)
        .args(script.args.iter().cloned())
        .cwd(cwd)
        .envs(command_env(state, &script.env))
        .user(run_as(state, script.privileged))
        .root(state.confinement());
    tracing::info!(command = %spec.display(), workdir = %workdir.display(), uid = ?spec.uid, "Running script");

    host.commands.run(&spec).await?.check(&script.program)?;
    Ok(StepOutput::none())
}
