//! Step tasks: one module per action kind.
//!
//! Each task reads what it needs from the [`EnvironmentState`], performs its
//! effects through the [`Host`] backends, and returns a [`StepOutput`]. Files
//! are always staged and renamed into place so a failing task leaves nothing
//! half-written behind.

mod archive;
mod copy;
mod env;
mod fetch;
mod identity;
mod packages;
mod script;
mod source_build;
mod trust;

#[cfg(test)]
pub(crate) mod testing;

use crate::host::Host;
use crate::state::{EnvironmentState, StepOutput};
use crate::step::{Action, Step, ToolVersion};
use artbox_shared::ArtboxResult;

pub(crate) async fn run_step(
    host: &Host,
    step: &Step,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    match step.action() {
        Action::TrustAnchors(trust) => trust::run_trust_anchors(host, trust, state).await,
        Action::ConfigureRepositories(repos) => copy::run_repositories(repos, state),
        Action::InstallPackages(set) => packages::run_package_set(host, set, state).await,
        Action::FetchResource(fetch) => fetch::run_fetch(host, fetch, state).await,
        Action::ExtractArchive(extract) => archive::run_extract(host, extract, state).await,
        Action::CopyFile(copy) => copy::run_copy_file(copy, state),
        Action::CopyTree(copy) => copy::run_copy_tree(copy, state).await,
        Action::RunScript(script) => script::run_script(host, script, state).await,
        Action::BuildFromSource(build) => source_build::run_source_build(host, build, state).await,
        Action::SetEnv(env) => env::run_set_env(env, state),
        Action::SetWorkdir(dir) => env::run_set_workdir(dir, state),
        Action::CreateIdentity(spec) => identity::run_create_identity(host, spec, state).await,
    }
}

/// Manifest note for inputs resolved from a `latest` placeholder.
fn floating_note(version: &ToolVersion, url: &str) -> Option<String> {
    if version.is_floating() {
        tracing::warn!(url = %url, "Fetching floating 'latest' version; image is not reproducible");
        Some(format!("{} ({})", url, version))
    } else {
        None
    }
}
