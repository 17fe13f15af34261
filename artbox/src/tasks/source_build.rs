//! Task: Build a tool from source.
//!
//! Clones a pinned ref into scratch space under the root, runs the build,
//! keeps the one produced binary and discards the checkout.

use super::script::command_env;
use crate::host::{CommandSpec, Host};
use crate::state::{Artifact, ArtifactKind, EnvironmentState, StepOutput};
use crate::step::SourceBuild;
use crate::util::{sha256_hex, write_atomic};
use artbox_shared::{ArtboxError, ArtboxResult};
use std::path::Path;

const SCRATCH_DIR: &str = "/tmp";

pub(super) async fn run_source_build(
    host: &Host,
    build: &SourceBuild,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    let Some((program, args)) = build.build.split_first() else {
        return Err(ArtboxError::Config(format!(
            "no build command for {}",
            build.repo
        )));
    };

    let scratch_parent = state.resolve(Path::new(SCRATCH_DIR))?;
    std::fs::create_dir_all(&scratch_parent)?;
    let scratch = tempfile::Builder::new()
        .prefix("artbox-src-")
        .tempdir_in(&scratch_parent)
        .map_err(|e| {
            ArtboxError::Storage(format!(
                "Failed to create build directory in {}: {}",
                scratch_parent.display(),
                e
            ))
        })?;
    let checkout = scratch.path().join("src");
    let image_checkout = Path::new(SCRATCH_DIR)
        .join(scratch.path().file_name().unwrap_or_default())
        .join("src");
    let env = command_env(state, &Default::default());

    let clone = CommandSpec::new("git")
        .args(["clone", "--depth", "1", "--branch"])
        .arg(&build.git_ref)
        .arg(&build.repo)
        .arg(image_checkout.display().to_string())
        .cwd(scratch.path())
        .envs(env.clone())
        .root(state.confinement());
    tracing::info!(repo = %build.repo, git_ref = %build.git_ref, "Cloning source");
    let cloned = host.commands.run(&clone).await.map_err(|e| {
        ArtboxError::Fetch(format!("git clone of {} failed to start: {}", build.repo, e))
    })?;
    if !cloned.is_success() {
        return Err(ArtboxError::Fetch(format!(
            "git clone of {} at {} failed: {}",
            build.repo,
            build.git_ref,
            cloned.stderr.trim()
        )));
    }

    let spec = CommandSpec::new(program)
        .args(args.iter().cloned())
        .cwd(&checkout)
        .envs(env)
        .root(state.confinement());
    tracing::info!(command = %spec.display(), "Building from source");
    host.commands.run(&spec).await?.check(program)?;

    let produced = checkout.join(&build.artifact);
    let bytes = tokio::fs::read(&produced).await.map_err(|e| {
        ArtboxError::Storage(format!(
            "build did not produce {}: {}",
            build.artifact.display(),
            e
        ))
    })?;
    write_atomic(&state.resolve(&build.dest)?, &bytes, 0o755)?;

    if let Err(e) = scratch.close() {
        tracing::warn!("Failed to remove build checkout: {}", e);
    }
    tracing::info!(dest = %build.dest.display(), "Installed source-built binary");

    Ok(StepOutput::none().artifact(Artifact::new(
        build.dest.clone(),
        ArtifactKind::Binary,
        sha256_hex(&bytes),
    )))
}
