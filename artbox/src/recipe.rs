//! The toolchain image recipe.
//!
//! Turns a [`ProvisionConfig`] into the canonical step list: trust, repos,
//! packages, tools, application, scanner, credentials config, then the
//! identity drop and the unprivileged finishing touches.

use crate::config::{ProvisionConfig, ToolConfig};
use crate::step::{
    Action, AnchorSource, ArchiveSource, Capability, CopyFile, CopyTree, EnvOp, ExtractArchive,
    FetchResource, IdentitySpec, PackageSet, RepositoryFiles, RunScript, SetEnv, SourceBuild,
    Step, TrustAnchors,
};
use crate::state::ArtifactKind;

pub fn toolchain_steps(config: &ProvisionConfig) -> Vec<Step> {
    let mut steps = Vec::new();

    if let Some(trust) = &config.trust {
        steps.push(Step::new(
            "trust-anchors",
            Action::TrustAnchors(TrustAnchors {
                anchors: trust
                    .anchors
                    .iter()
                    .map(|a| AnchorSource {
                        url: a.url.clone(),
                        file_name: a.file_name.clone(),
                        sha256: a.sha256.clone(),
                    })
                    .collect(),
                anchor_dir: trust.anchor_dir.clone(),
                refresh: trust.refresh.clone(),
                secures: trust.secures.clone(),
            }),
        ));
    }

    if !config.repositories.is_empty() {
        steps.push(Step::new(
            "configure-repositories",
            Action::ConfigureRepositories(RepositoryFiles {
                files: config.repositories.clone(),
                dest_dir: config.repo_dir.clone(),
            }),
        ));
    }

    let conflicts: Vec<String> = config
        .packages
        .remove
        .iter()
        .chain(config.runtime.iter().flat_map(|r| r.conflicts.iter()))
        .cloned()
        .collect();
    if !conflicts.is_empty() {
        steps.push(Step::new(
            "remove-conflicts",
            Action::InstallPackages(PackageSet {
                install: Vec::new(),
                remove: conflicts,
            }),
        ));
    }

    if !config.packages.install.is_empty() {
        steps.push(Step::new(
            "install-packages",
            Action::InstallPackages(PackageSet {
                install: config.packages.install.clone(),
                remove: Vec::new(),
            }),
        ));
    }

    if let Some(runtime) = &config.runtime {
        let step = runtime.conflicts.iter().fold(
            Step::new(
                "install-runtime",
                Action::InstallPackages(PackageSet {
                    install: runtime.packages.clone(),
                    remove: Vec::new(),
                }),
            ),
            |step, conflict| step.requires(Capability::Removed(conflict.clone())),
        );
        steps.push(step);
    }

    for tool in &config.tools {
        steps.push(tool_step(config, tool));
    }

    let uses_bin_dir = !config.tools.is_empty() || config.scanner.is_some();
    if uses_bin_dir {
        steps.push(Step::new(
            "bin-dir-on-path",
            Action::SetEnv(SetEnv {
                name: "PATH".to_string(),
                value: config.bin_dir.display().to_string(),
                op: EnvOp::Prepend,
            }),
        ));
    }

    if let Some(app) = &config.application {
        steps.push(Step::new(
            "copy-application",
            Action::CopyTree(CopyTree {
                src: app.source.clone(),
                dest: app.dest.clone(),
            }),
        ));
        let mut install = RunScript::entry_point(&app.install).workdir(&app.dest);
        install.env = app.env.clone();
        steps.push(Step::new("install-application", Action::RunScript(install)));
    }

    if let Some(scanner) = &config.scanner {
        let step = scanner.packages.iter().fold(
            Step::new(
                format!("build-{}", scanner.name),
                Action::BuildFromSource(SourceBuild {
                    repo: scanner.repo.clone(),
                    git_ref: scanner.git_ref.clone(),
                    build: scanner.build.clone(),
                    artifact: scanner.artifact.clone(),
                    dest: config.bin_dir.join(&scanner.name),
                }),
            ),
            |step, package| step.requires(Capability::Package(package.clone())),
        );
        steps.push(step);
    }

    if let Some(krb5) = &config.kerberos {
        steps.push(Step::new(
            "kerberos-config",
            Action::CopyFile(CopyFile {
                src: krb5.src.clone(),
                dest: krb5.dest.clone(),
                mode: Some(0o644),
                kind: ArtifactKind::Config,
            }),
        ));
    }

    if let Some(identity) = &config.identity {
        steps.push(Step::new(
            "create-identity",
            Action::CreateIdentity(IdentitySpec {
                user: identity.user.clone(),
                uid: identity.uid,
                gid: identity.gid(),
                home: identity.home(),
            }),
        ));
    }

    for (name, value) in &config.env {
        steps.push(Step::new(
            format!("env-{}", name.to_ascii_lowercase()),
            Action::SetEnv(SetEnv {
                name: name.clone(),
                value: value.clone(),
                op: EnvOp::Set,
            }),
        ));
    }

    if let Some(workdir) = &config.workdir {
        steps.push(Step::new("workdir", Action::SetWorkdir(workdir.clone())));
    }

    steps
}

/// Single-file tools are fetched straight into the bin dir; archived tools
/// have their members extracted there.
fn tool_step(config: &ProvisionConfig, tool: &ToolConfig) -> Step {
    let url = tool.version.render(&tool.url);
    if tool.members.is_empty() {
        Step::new(
            format!("fetch-{}", tool.name),
            Action::FetchResource(FetchResource {
                url,
                dest: config.bin_dir.join(&tool.name),
                sha256: tool.sha256.clone(),
                mode: 0o755,
                version: tool.version.clone(),
            }),
        )
    } else {
        Step::new(
            format!("install-{}", tool.name),
            Action::ExtractArchive(ExtractArchive {
                source: ArchiveSource::Url {
                    url,
                    sha256: tool.sha256.clone(),
                },
                members: tool.members.clone(),
                dest_dir: config.bin_dir.clone(),
                version: tool.version.clone(),
            }),
        )
    }
}
