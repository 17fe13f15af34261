//! Task: Archive extraction.
//!
//! Only the requested members are installed, each under its file name in
//! the destination directory. All members are read and checked before
//! anything is placed: a missing member fails the step with nothing
//! installed.

use super::floating_note;
use crate::host::Host;
use crate::state::{Artifact, ArtifactKind, EnvironmentState, StepOutput};
use crate::step::{ArchiveSource, ExtractArchive};
use crate::util::{StagedFiles, sha256_hex, verify_sha256};
use artbox_shared::{ArtboxError, ArtboxResult};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on buffer space reserved from a member's declared size.
const PREALLOC_LIMIT: u64 = 1024 * 1024;

/// A member read out of an archive.
#[derive(Debug)]
struct ExtractedMember {
    file_name: String,
    data: Vec<u8>,
}

pub(super) async fn run_extract(
    host: &Host,
    extract: &ExtractArchive,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    if extract.members.is_empty() {
        return Err(ArtboxError::Extraction("no archive members requested".into()));
    }

    let (bytes, origin) = match &extract.source {
        ArchiveSource::Url { url, sha256 } => {
            let anchors = state.trust_anchor_files()?;
            let bytes = host.fetcher.fetch(url, &anchors).await?;
            verify_sha256(url, &bytes, sha256.as_deref())?;
            (bytes, url.clone())
        }
        ArchiveSource::Path(path) => {
            let host_path = state.resolve(path)?;
            let bytes = tokio::fs::read(&host_path).await.map_err(|e| {
                ArtboxError::Extraction(format!("Failed to read archive {}: {}", path.display(), e))
            })?;
            (bytes, path.display().to_string())
        }
    };

    let members = extract.members.clone();
    let selected = tokio::task::spawn_blocking(move || select_members(&bytes, &members))
        .await
        .map_err(|e| ArtboxError::Internal(format!("extraction task panicked: {}", e)))??;

    let mut staged = StagedFiles::new();
    let mut output = StepOutput::none();
    for member in &selected {
        let image_path = extract.dest_dir.join(&member.file_name);
        staged.stage(&state.resolve(&image_path)?, &member.data, 0o755)?;
        output.artifacts.push(
            Artifact::new(image_path, ArtifactKind::Binary, sha256_hex(&member.data))
                .floating(extract.version.is_floating()),
        );
    }
    staged.commit()?;

    tracing::info!(
        archive = %origin,
        members = selected.len(),
        dest = %extract.dest_dir.display(),
        "Extracted archive members"
    );

    output.floating = floating_note(&extract.version, &origin);
    Ok(output)
}

/// Read the requested `members` from a tar (or tar.gz) archive, in request
/// order.
fn select_members(
    archive: &[u8],
    members: &[String],
) -> ArtboxResult<Vec<ExtractedMember>> {
    let mut file_names = BTreeMap::new();
    for member in members {
        let key = normalize(member);
        let file_name = Path::new(&key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ArtboxError::Extraction(format!("invalid member name '{}'", member)))?;
        if let Some(other) = file_names.insert(file_name.clone(), member) {
            return Err(ArtboxError::Extraction(format!(
                "members '{}' and '{}' would both install as {}",
                other, member, file_name
            )));
        }
    }

    let gzipped = archive.starts_with(&GZIP_MAGIC);
    let reader: Box<dyn Read + '_> = if gzipped {
        Box::new(GzDecoder::new(archive))
    } else {
        Box::new(archive)
    };
    let mut tar = tar::Archive::new(reader);
    let wanted: BTreeMap<String, &String> = members.iter().map(|m| (normalize(m), m)).collect();
    let mut found: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    let entries = tar.entries().map_err(corrupt)?;
    for entry in entries {
        let mut entry = entry.map_err(corrupt)?;
        let key = normalize(&entry.path().map_err(corrupt)?.to_string_lossy());
        if !wanted.contains_key(&key) || found.contains_key(&key) {
            continue;
        }
        if !entry.header().entry_type().is_file() {
            return Err(ArtboxError::Extraction(format!(
                "archive member '{}' is not a regular file",
                key
            )));
        }
        let declared = entry.size();
        if !gzipped && declared > archive.len() as u64 {
            return Err(ArtboxError::Extraction(format!(
                "corrupt archive: member '{}' claims {} bytes in a {} byte archive",
                key,
                declared,
                archive.len()
            )));
        }
        let mut data = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
        entry.read_to_end(&mut data).map_err(corrupt)?;
        if data.len() as u64 != declared {
            return Err(ArtboxError::Extraction(format!(
                "corrupt archive: member '{}' is truncated ({} of {} bytes)",
                key,
                data.len(),
                declared
            )));
        }
        found.insert(key, data);
    }

    let missing: Vec<&str> = wanted
        .iter()
        .filter(|(key, _)| !found.contains_key(*key))
        .map(|(_, member)| member.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ArtboxError::Extraction(format!(
            "archive is missing requested members: {}",
            missing.join(", ")
        )));
    }

    members
        .iter()
        .map(|member| {
            let key = normalize(member);
            let data = found.remove(&key).unwrap_or_default();
            let file_name = Path::new(&key)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(key);
            Ok(ExtractedMember { file_name, data })
        })
        .collect()
}

fn normalize(member: &str) -> String {
    let mut name = member.trim();
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name.trim_start_matches('/').trim_end_matches('/').to_string()
}

fn corrupt(e: std::io::Error) -> ArtboxError {
    ArtboxError::Extraction(format!("corrupt archive: {}", e))
}
