//! Host-side effects behind substitutable backends.
//!
//! Steps never touch the network, the package database or child processes
//! directly; they go through the [`CommandRunner`], [`Fetcher`] and
//! [`PackageManager`] held by a [`Host`]. Tests build a `Host` from fakes.

mod command;
mod fetch;
mod packages;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use fetch::{Fetcher, HttpFetcher};
pub use packages::{DnfPackageManager, PackageManager};

use crate::pipeline::StepRunner;
use crate::state::{EnvironmentState, StepOutput};
use crate::step::Step;
use artbox_shared::ArtboxResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Backends used to carry out steps.
#[derive(Clone)]
pub struct Host {
    pub(crate) commands: Arc<dyn CommandRunner>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) packages: Arc<dyn PackageManager>,
}

impl Host {
    pub fn new(
        commands: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn Fetcher>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        Self {
            commands,
            fetcher,
            packages,
        }
    }

    /// Real processes, HTTP and dnf.
    pub fn system() -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let packages = Arc::new(DnfPackageManager::new(Arc::clone(&commands)));
        Self::new(commands, Arc::new(HttpFetcher::new()), packages)
    }
}

#[async_trait]
impl StepRunner for Host {
    async fn run(&self, step: &Step, state: &EnvironmentState) -> ArtboxResult<StepOutput> {
        crate::tasks::run_step(self, step, state).await
    }
}
