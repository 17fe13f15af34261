//! In-memory backends for task tests.

use crate::host::{CommandOutput, CommandRunner, CommandSpec, Fetcher, Host, PackageManager};
use artbox_shared::{ArtboxError, ArtboxResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Smallest block that decodes to a DER sequence.
pub(crate) const SAMPLE_PEM: &str =
    "-----BEGIN CERTIFICATE-----\nMAMCAQE=\n-----END CERTIFICATE-----\n";

type Hook = Box<dyn Fn(&CommandSpec) + Send + Sync>;

#[derive(Default)]
struct FakeFetcher {
    bodies: Mutex<BTreeMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _trust_anchors: &[PathBuf]) -> ArtboxResult<Vec<u8>> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ArtboxError::Fetch(format!("GET {} returned 404 Not Found", url)))
    }
}

#[derive(Default)]
struct FakeCommands {
    seen: Mutex<Vec<CommandSpec>>,
    failures: Mutex<BTreeMap<String, (i32, String)>>,
    hook: Mutex<Option<Hook>>,
}

#[async_trait]
impl CommandRunner for FakeCommands {
    async fn run(&self, spec: &CommandSpec) -> ArtboxResult<CommandOutput> {
        self.seen.lock().unwrap().push(spec.clone());
        if let Some((code, stderr)) = self.failures.lock().unwrap().get(&spec.program) {
            return Ok(CommandOutput::failure(*code, stderr.clone()));
        }
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(spec);
        }
        Ok(CommandOutput::success())
    }
}

#[derive(Default)]
struct FakePackages {
    installed: Mutex<BTreeSet<String>>,
    unavailable: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PackageManager for FakePackages {
    async fn installed(&self, _root: &Path, names: &[String]) -> ArtboxResult<BTreeSet<String>> {
        let installed = self.installed.lock().unwrap();
        Ok(names.iter().filter(|n| installed.contains(*n)).cloned().collect())
    }

    async fn install(&self, _root: &Path, names: &[String]) -> ArtboxResult<()> {
        self.calls.lock().unwrap().push(format!("install {}", names.join(" ")));
        let unavailable = self.unavailable.lock().unwrap();
        if let Some(missing) = names.iter().find(|n| unavailable.contains(*n)) {
            return Err(ArtboxError::Resolution(format!(
                "Unable to find a match: {}",
                missing
            )));
        }
        self.installed.lock().unwrap().extend(names.iter().cloned());
        Ok(())
    }

    async fn remove(&self, _root: &Path, names: &[String]) -> ArtboxResult<()> {
        self.calls.lock().unwrap().push(format!("remove {}", names.join(" ")));
        let mut installed = self.installed.lock().unwrap();
        for name in names {
            installed.remove(name);
        }
        Ok(())
    }
}

/// Builder for a [`Host`] backed by fakes, keeping handles for assertions.
#[derive(Default)]
pub(crate) struct FakeHost {
    fetcher: Arc<FakeFetcher>,
    commands: Arc<FakeCommands>,
    packages: Arc<FakePackages>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(self, url: &str, body: &[u8]) -> Self {
        self.fetcher
            .bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
        self
    }

    pub(crate) fn fail_command(self, program: &str, code: i32, stderr: &str) -> Self {
        self.commands
            .failures
            .lock()
            .unwrap()
            .insert(program.to_string(), (code, stderr.to_string()));
        self
    }

    /// Side effect run for every successful command.
    pub(crate) fn on_command(self, hook: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        *self.commands.hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub(crate) fn preinstalled(self, names: &[&str]) -> Self {
        self.packages
            .installed
            .lock()
            .unwrap()
            .extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub(crate) fn unavailable(self, names: &[&str]) -> Self {
        self.packages
            .unavailable
            .lock()
            .unwrap()
            .extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub(crate) fn host(&self) -> Host {
        Host::new(
            self.commands.clone(),
            self.fetcher.clone(),
            self.packages.clone(),
        )
    }

    pub(crate) fn commands_run(&self) -> Vec<String> {
        self.command_specs().iter().map(CommandSpec::display).collect()
    }

    pub(crate) fn command_specs(&self) -> Vec<CommandSpec> {
        self.commands.seen.lock().unwrap().clone()
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetcher.fetched.lock().unwrap().clone()
    }

    pub(crate) fn package_calls(&self) -> Vec<String> {
        self.packages.calls.lock().unwrap().clone()
    }
}
