//! Task: Fetch a single remote file into the image.

use super::floating_note;
use crate::host::Host;
use crate::state::{Artifact, ArtifactKind, EnvironmentState, StepOutput};
use crate::step::FetchResource;
use crate::util::{sha256_hex, verify_sha256, write_atomic};
use artbox_shared::ArtboxResult;

pub(super) async fn run_fetch(
    host: &Host,
    fetch: &FetchResource,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    let anchors = state.trust_anchor_files()?;
    let bytes = host.fetcher.fetch(&fetch.url, &anchors).await?;
    verify_sha256(&fetch.url, &bytes, fetch.sha256.as_deref())?;

    let target = state.resolve(&fetch.dest)?;
    write_atomic(&target, &bytes, fetch.mode)?;
    tracing::info!(
        url = %fetch.url,
        dest = %fetch.dest.display(),
        bytes = bytes.len(),
        "Placed fetched file"
    );

    let kind = if fetch.mode & 0o111 != 0 {
        ArtifactKind::Binary
    } else {
        ArtifactKind::File
    };
    let artifact = Artifact::new(fetch.dest.clone(), kind, sha256_hex(&bytes))
        .floating(fetch.version.is_floating());

    Ok(StepOutput {
        floating: floating_note(&fetch.version, &fetch.url),
        ..StepOutput::none().artifact(artifact)
    })
}
