//! Construction-time checks over a declared step list.
//!
//! A pipeline that fails these checks is never run. The checks are:
//!
//! - step names are non-empty and unique;
//! - every requirement that some step provides is provided *earlier*
//!   (requirements nobody provides are assumed to come from the base image);
//!   this covers trust-before-fetch, repositories-before-packages,
//!   packages/binaries-before-use, source-before-install and
//!   removal-before-replacement;
//! - no step removes a package that an earlier step installed;
//! - at most one identity drop, and nothing privileged after it.

use crate::step::{Capability, Privilege, Step};
use artbox_shared::{ArtboxError, ArtboxResult};
use std::collections::{HashMap, HashSet};

/// Validate `steps`, reporting every violation found.
pub fn validate(steps: &[Step]) -> ArtboxResult<()> {
    let violations = violations(steps);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArtboxError::Validation(violations.join("; ")))
    }
}

/// All invariant violations in declaration order.
pub fn violations(steps: &[Step]) -> Vec<String> {
    let mut out = Vec::new();
    check_names(steps, &mut out);
    check_requirements(steps, &mut out);
    check_removals(steps, &mut out);
    check_identity(steps, &mut out);
    out
}

fn label(index: usize, step: &Step) -> String {
    format!("step {} '{}'", index + 1, step.name())
}

fn check_names(steps: &[Step], out: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        if step.name().trim().is_empty() {
            out.push(format!("step {} has an empty name", index + 1));
        } else if !seen.insert(step.name()) {
            out.push(format!("{} reuses a step name", label(index, step)));
        }
    }
}

fn check_requirements(steps: &[Step], out: &mut Vec<String>) {
    let mut first_provider: HashMap<Capability, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        for capability in step.provides() {
            first_provider.entry(capability).or_insert(index);
        }
    }

    for (index, step) in steps.iter().enumerate() {
        for requirement in step.requirements() {
            if let Some(&provider) = first_provider.get(&requirement)
                && provider > index
            {
                out.push(format!(
                    "{} requires {} which is first provided by later {}",
                    label(index, step),
                    requirement,
                    label(provider, &steps[provider])
                ));
            }
        }
    }
}

fn check_removals(steps: &[Step], out: &mut Vec<String>) {
    let mut installed_by: HashMap<&str, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        for package in step.removes() {
            if step.installs().contains(package) {
                out.push(format!(
                    "{} both installs and removes package {}",
                    label(index, step),
                    package
                ));
            } else if let Some(&installer) = installed_by.get(package.as_str()) {
                out.push(format!(
                    "{} removes package {} installed by {}",
                    label(index, step),
                    package,
                    label(installer, &steps[installer])
                ));
            }
        }
        for package in step.installs() {
            installed_by.entry(package.as_str()).or_insert(index);
        }
    }
}

fn check_identity(steps: &[Step], out: &mut Vec<String>) {
    let mut dropped_at: Option<usize> = None;
    for (index, step) in steps.iter().enumerate() {
        if let Some(drop_index) = dropped_at {
            if step.is_identity_drop() {
                out.push(format!(
                    "{} drops privilege again after {}",
                    label(index, step),
                    label(drop_index, &steps[drop_index])
                ));
            } else if step.privilege() == Privilege::Required {
                out.push(format!(
                    "{} requires elevated privilege after identity drop at {}",
                    label(index, step),
                    label(drop_index, &steps[drop_index])
                ));
            }
        } else if step.is_identity_drop() {
            dropped_at = Some(index);
        }
    }
}
