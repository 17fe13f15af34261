//! Atomic placement of files and directories.
//!
//! Everything a step writes into the image goes through a temporary sibling
//! first and is renamed into place, so a failed step never leaves a
//! truncated file at a path later steps (or the final image) rely on.

use artbox_shared::{ArtboxError, ArtboxResult};
use sha2::{Digest, Sha256};
use std::fs::{self, Permissions};
use nix::unistd::{Gid, Uid, chown, geteuid};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

const TEMP_PREFIX: &str = ".artbox-";

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare the digest of `bytes` with an expected hex digest, if any.
pub(crate) fn verify_sha256(what: &str, bytes: &[u8], expected: Option<&str>) -> ArtboxResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ArtboxError::Fetch(format!(
            "checksum mismatch for {}: expected sha256 {}, got {}",
            what, expected, actual
        )));
    }
    Ok(())
}

pub(crate) fn read_context_file(path: &Path) -> ArtboxResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ArtboxError::Storage(format!(
            "Failed to read build context file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Write `bytes` to `target` with `mode` via temp file + rename.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8], mode: u32) -> ArtboxResult<()> {
    let staged = stage_file(target, bytes, mode)?;
    staged.persist(target).map_err(|e| {
        ArtboxError::Storage(format!(
            "Failed to move file into place at {}: {}",
            target.display(),
            e.error
        ))
    })?;
    Ok(())
}

fn stage_file(target: &Path, bytes: &[u8], mode: u32) -> ArtboxResult<NamedTempFile> {
    let parent = target.parent().ok_or_else(|| {
        ArtboxError::Storage(format!("Target has no parent directory: {}", target.display()))
    })?;
    fs::create_dir_all(parent).map_err(|e| {
        ArtboxError::Storage(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| {
            ArtboxError::Storage(format!(
                "Failed to create temporary file in {}: {}",
                parent.display(),
                e
            ))
        })?;
    file.write_all(bytes)?;
    file.flush()?;
    file.as_file().sync_all()?;
    fs::set_permissions(file.path(), Permissions::from_mode(mode))?;
    Ok(file)
}

/// Group of files that become visible together or not at all.
///
/// Files are written to temporaries on [`stage`](Self::stage). Dropping the
/// group before [`commit`](Self::commit) deletes every temporary. If a rename
/// fails midway through a commit, files already renamed by this group are
/// removed again; the previous contents of those paths are not restored.
#[derive(Default)]
pub(crate) struct StagedFiles {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedFiles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stage(&mut self, target: &Path, bytes: &[u8], mode: u32) -> ArtboxResult<()> {
        let file = stage_file(target, bytes, mode)?;
        self.staged.push((file, target.to_path_buf()));
        Ok(())
    }

    pub(crate) fn commit(self) -> ArtboxResult<Vec<PathBuf>> {
        let mut placed: Vec<PathBuf> = Vec::with_capacity(self.staged.len());

        for (file, target) in self.staged {
            if let Err(e) = file.persist(&target) {
                for path in &placed {
                    if let Err(err) = fs::remove_file(path) {
                        tracing::warn!(path = %path.display(), "Failed to roll back placed file: {}", err);
                    }
                }
                // Remaining temporaries are removed when the iterator drops.
                return Err(ArtboxError::Storage(format!(
                    "Failed to move file into place at {}: {}",
                    target.display(),
                    e.error
                )));
            }
            placed.push(target);
        }

        Ok(placed)
    }
}

/// Swap a fully populated staging directory into `dest`.
///
/// An existing `dest` is moved aside first and deleted only once the new
/// tree is in place.
pub(crate) fn replace_dir(staged: TempDir, dest: &Path) -> ArtboxResult<()> {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArtboxError::Storage(format!("Invalid directory target: {}", dest.display())))?;
    let backup = dest.with_file_name(format!("{}{}.old", TEMP_PREFIX, name));

    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }
    let had_previous = dest.exists();
    if had_previous {
        fs::rename(dest, &backup).map_err(|e| {
            ArtboxError::Storage(format!(
                "Failed to move existing {} aside: {}",
                dest.display(),
                e
            ))
        })?;
    }

    if let Err(e) = fs::rename(staged.path(), dest) {
        if had_previous && let Err(restore) = fs::rename(&backup, dest) {
            tracing::warn!(
                path = %dest.display(),
                backup = %backup.display(),
                "Failed to restore replaced directory: {}",
                restore
            );
        }
        return Err(ArtboxError::Storage(format!(
            "Failed to move directory into place at {}: {}",
            dest.display(),
            e
        )));
    }

    if had_previous && let Err(e) = fs::remove_dir_all(&backup) {
        tracing::warn!(path = %backup.display(), "Failed to remove replaced directory: {}", e);
    }
    Ok(())
}

/// Create `dir` and any missing parents. When `dir` itself is new it is
/// handed to `owner` as `(uid, gid)`; parents stay with the caller.
///
/// Ownership can only be given away by root, so other callers get a plain
/// directory.
pub(crate) fn create_dir_owned(dir: &Path, owner: Option<(u32, u32)>) -> ArtboxResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| {
        ArtboxError::Storage(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    let Some((uid, gid)) = owner else {
        return Ok(());
    };
    if !geteuid().is_root() {
        tracing::debug!(path = %dir.display(), uid, "Not root; leaving directory ownership");
        return Ok(());
    }
    chown(dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
        ArtboxError::Storage(format!(
            "Failed to hand {} to uid {}: {}",
            dir.display(),
            uid,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_create_dir_owned_hands_over_the_new_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("home/dev");
        create_dir_owned(&target, Some((1000, 1000))).unwrap();

        assert!(target.is_dir());
        let me = geteuid().as_raw();
        assert_eq!(fs::metadata(dir.path().join("home")).unwrap().uid(), me);
        let meta = fs::metadata(&target).unwrap();
        if geteuid().is_root() {
            assert_eq!((meta.uid(), meta.gid()), (1000, 1000));
        } else {
            assert_eq!(meta.uid(), me);
        }
    }

    #[test]
    fn test_write_atomic_sets_mode_and_leaves_no_temporaries() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("bin/tool");
        write_atomic(&target, b"#!/bin/sh\n", 0o755).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"#!/bin/sh\n");
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let entries: Vec<_> = fs::read_dir(dir.path().join("bin")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_dropped_staging_places_nothing() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedFiles::new();
        staged.stage(&dir.path().join("a"), b"a", 0o644).unwrap();
        staged.stage(&dir.path().join("b"), b"b", 0o644).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        drop(staged);

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_places_all() {
        let dir = TempDir::new().unwrap();
        let mut staged = StagedFiles::new();
        staged.stage(&dir.path().join("a"), b"a", 0o644).unwrap();
        staged.stage(&dir.path().join("b"), b"b", 0o644).unwrap();
        let placed = staged.commit().unwrap();

        assert_eq!(placed.len(), 2);
        assert_eq!(fs::read(dir.path().join("b")).unwrap(), b"b");
    }

    #[test]
    fn test_checksum_mismatch_is_fetch_error() {
        let digest = sha256_hex(b"payload");
        assert!(verify_sha256("x", b"payload", Some(&digest)).is_ok());
        assert!(verify_sha256("x", b"payload", None).is_ok());

        let err = verify_sha256("x", b"tampered", Some(&digest)).unwrap_err();
        assert!(matches!(err, ArtboxError::Fetch(_)));
    }

    #[test]
    fn test_replace_dir_swaps_existing_tree() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("app");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        let staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(dir.path())
            .unwrap();
        fs::write(staged.path().join("fresh.txt"), "new").unwrap();
        replace_dir(staged, &dest).unwrap();

        assert!(dest.join("fresh.txt").exists());
        assert!(!dest.join("stale.txt").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
