//! Task: Package set.
//!
//! Conflicting packages go first, then the requested installs. Both halves
//! are idempotent: names already absent (or already present) are skipped.

use crate::host::Host;
use crate::state::{EnvironmentState, StepOutput};
use crate::step::PackageSet;
use artbox_shared::ArtboxResult;
use std::collections::BTreeSet;

pub(super) async fn run_package_set(
    host: &Host,
    set: &PackageSet,
    state: &EnvironmentState,
) -> ArtboxResult<StepOutput> {
    let root = state.root();
    let remove = dedup(&set.remove);
    let install = dedup(&set.install);

    if !remove.is_empty() {
        let present = host.packages.installed(root, &remove).await?;
        let targets: Vec<String> = remove.iter().filter(|p| present.contains(*p)).cloned().collect();
        if targets.is_empty() {
            tracing::info!(packages = %remove.join(" "), "Conflicting packages already absent");
        } else {
            host.packages.remove(root, &targets).await?;
            tracing::info!(packages = %targets.join(" "), "Removed conflicting packages");
        }
    }

    if !install.is_empty() {
        let present = host.packages.installed(root, &install).await?;
        let missing: Vec<String> = install.iter().filter(|p| !present.contains(*p)).cloned().collect();
        if missing.is_empty() {
            tracing::info!("All requested packages already installed");
        } else {
            host.packages.install(root, &missing).await?;
            tracing::info!(count = missing.len(), packages = %missing.join(" "), "Installed packages");
        }
    }

    Ok(StepOutput {
        packages_added: install,
        packages_removed: remove,
        ..StepOutput::default()
    })
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect()
}
