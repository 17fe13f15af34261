//! Task: Trust anchors.
//!
//! Fetches CA certificates into the anchor directory and regenerates the
//! consolidated trust bundle. Every failure here is a trust error: later
//! fetches may depend on these anchors.

use super::script::command_env;
use crate::host::{CommandSpec, Host};
use crate::state::{Artifact, ArtifactKind, EnvironmentState, StepOutput};
use crate::step::TrustAnchors;
use crate::util::{StagedFiles, sha256_hex, verify_sha256};
use artbox_shared::{ArtboxError, ArtboxResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

pub(super) async fn run_trust_anchors(
    host: &Host,
    trust: &TrustAnchors,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    if trust.anchors.is_empty() {
        return Err(ArtboxError::Trust("no trust anchors configured".into()));
    }

    let existing = state.trust_anchor_files()?;
    let mut staged = StagedFiles::new();
    let mut output = StepOutput::none();

    for anchor in &trust.anchors {
        let bytes = host
            .fetcher
            .fetch(&anchor.url, &existing)
            .await
            .map_err(|e| ArtboxError::Trust(format!("failed to fetch {}: {}", anchor.url, e)))?;
        verify_sha256(&anchor.url, &bytes, anchor.sha256.as_deref())
            .map_err(|e| ArtboxError::Trust(e.to_string()))?;
        let certificates = parse_certificates(&bytes).map_err(|reason| {
            ArtboxError::Trust(format!("{} is not a usable certificate: {}", anchor.url, reason))
        })?;

        let image_path = trust.anchor_dir.join(&anchor.file_name);
        staged.stage(&state.resolve(&image_path)?, &bytes, 0o644)?;
        tracing::info!(
            url = %anchor.url,
            path = %image_path.display(),
            certificates,
            "Staged trust anchor"
        );

        output.trust_anchors.push(image_path.clone());
        output.artifacts.push(Artifact::new(
            image_path,
            ArtifactKind::TrustAnchor,
            sha256_hex(&bytes),
        ));
    }

    staged.commit()?;

    if let Some((program, args)) = trust.refresh.split_first() {
        let spec = CommandSpec::new(program)
            .args(args.iter().cloned())
            .cwd(state.root())
            .envs(command_env(state, &Default::default()))
            .root(state.confinement());
        let result = host
            .commands
            .run(&spec)
            .await
            .map_err(|e| ArtboxError::Trust(e.to_string()))?;
        if !result.is_success() {
            return Err(ArtboxError::Trust(format!(
                "{} failed: {}",
                spec.display(),
                result.stderr.trim()
            )));
        }
        tracing::info!(command = %spec.display(), "Refreshed trust store");
    }

    Ok(output)
}

/// Count the PEM certificates in `bytes`, rejecting anything that does not
/// decode to at least one DER sequence.
fn parse_certificates(bytes: &[u8]) -> Result<usize, String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "not PEM text".to_string())?;
    let mut count = 0;
    let mut rest = text;

    while let Some(start) = rest.find(PEM_BEGIN) {
        let body_start = start + PEM_BEGIN.len();
        let body_len = rest[body_start..]
            .find(PEM_END)
            .ok_or_else(|| "unterminated certificate block".to_string())?;
        let body: String = rest[body_start..body_start + body_len]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| format!("invalid base64 in certificate {}: {}", count + 1, e))?;
        if der.first() != Some(&0x30) {
            return Err(format!("certificate {} is not DER encoded", count + 1));
        }
        count += 1;
        rest = &rest[body_start + body_len + PEM_END.len()..];
    }

    if count == 0 {
        return Err("no PEM certificate found".to_string());
    }
    Ok(count)
}
