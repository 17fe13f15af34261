//! Tasks: Build-context copies.
//!
//! Repository definitions, single files and whole trees are taken from the
//! build context and placed into the image atomically.

use crate::state::{Artifact, ArtifactKind, EnvironmentState, StepOutput};
use crate::step::{CopyFile, CopyTree, RepositoryFiles};
use crate::util::{StagedFiles, read_context_file, replace_dir, sha256_hex, write_atomic};
use artbox_shared::{ArtboxError, ArtboxResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(super) fn run_repositories(
    repos: &RepositoryFiles,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    if repos.files.is_empty() {
        return Err(ArtboxError::Config("no repository files configured".into()));
    }

    let mut staged = StagedFiles::new();
    let mut output = StepOutput::none();
    for file in &repos.files {
        let bytes = read_context_file(&state.context_path(file))?;
        let file_name = file.file_name().ok_or_else(|| {
            ArtboxError::Config(format!("repository file has no name: {}", file.display()))
        })?;
        if file.extension().is_none_or(|ext| ext != "repo") {
            tracing::warn!(file = %file.display(), "Repository file does not end in .repo; dnf will ignore it");
        }
        let image_path = repos.dest_dir.join(file_name);
        staged.stage(&state.resolve(&image_path)?, &bytes, 0o644)?;
        output
            .artifacts
            .push(Artifact::new(image_path, ArtifactKind::Config, sha256_hex(&bytes)));
    }

    let placed = staged.commit()?;
    tracing::info!(count = placed.len(), dest = %repos.dest_dir.display(), "Configured repositories");
    Ok(output)
}

pub(super) fn run_copy_file(copy: &CopyFile, state: &EnvironmentState) -> ArtboxResult<StepOutput> {
    let src = state.context_path(&copy.src);
    let bytes = read_context_file(&src)?;
    let mode = match copy.mode {
        Some(mode) => mode,
        None => fs::metadata(&src)?.permissions().mode() & 0o7777,
    };

    write_atomic(&state.resolve(&copy.dest)?, &bytes, mode)?;
    tracing::info!(src = %copy.src.display(), dest = %copy.dest.display(), mode = %format!("{:o}", mode), "Copied file");

    Ok(StepOutput::none().artifact(Artifact::new(
        copy.dest.clone(),
        copy.kind,
        sha256_hex(&bytes),
    )))
}

pub(super) async fn run_copy_tree(
    copy: &CopyTree,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    let src = state.context_path(&copy.src);
    let dest = state.resolve(&copy.dest)?;

    let digest = tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
        .await
        .map_err(|e| ArtboxError::Internal(format!("copy task panicked: {}", e)))??;
    tracing::info!(src = %copy.src.display(), dest = %copy.dest.display(), "Copied tree");

    Ok(StepOutput::none().artifact(Artifact::new(copy.dest.clone(), ArtifactKind::Tree, digest)))
}

/// Copy `src` to `dest` through a staging directory next to `dest`.
///
/// Returns a digest over relative paths and contents, in sorted order.
fn copy_tree(src: &Path, dest: &Path) -> ArtboxResult<String> {
    if !src.is_dir() {
        return Err(ArtboxError::Storage(format!(
            "source tree {} is not a directory",
            src.display()
        )));
    }
    let parent = dest.parent().ok_or_else(|| {
        ArtboxError::Storage(format!("Target has no parent directory: {}", dest.display()))
    })?;
    fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".artbox-")
        .tempdir_in(parent)
        .map_err(|e| {
            ArtboxError::Storage(format!(
                "Failed to create staging directory in {}: {}",
                parent.display(),
                e
            ))
        })?;
    fs::set_permissions(staging.path(), fs::metadata(src)?.permissions())?;

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ArtboxError::Storage(format!("Failed to walk {}: {}", src.display(), e))
        })?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        let target: PathBuf = staging.path().join(&relative);
        let file_type = entry.file_type();
        hasher.update(relative.to_string_lossy().as_bytes());

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata().map_err(walk_error)?.permissions())?;
            hasher.update(b"/");
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)?;
            hasher.update(b" -> ");
            hasher.update(link.to_string_lossy().as_bytes());
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                ArtboxError::Storage(format!("Failed to copy {}: {}", entry.path().display(), e))
            })?;
            hasher.update(b"\0");
            hasher.update(fs::read(entry.path())?);
        }
        hasher.update(b"\n");
    }

    replace_dir(staging, dest)?;
    Ok(hex::encode(hasher.finalize()))
}

fn walk_error(e: walkdir::Error) -> ArtboxError {
    ArtboxError::Storage(format!("Failed to read metadata: {}", e))
}
