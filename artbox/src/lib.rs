//! artbox: provisions a toolchain image from a base OS root.
//!
//! A provisioning run is an ordered list of declarative [`step::Step`]s,
//! validated up front and executed one at a time by
//! [`pipeline::PipelineExecutor`] against an [`state::EnvironmentState`].
//! Host effects (processes, downloads, the package database) go through the
//! backends in [`host`], so runs can target a staging root or fakes.

pub mod config;
pub mod host;
pub mod logging;
pub mod pipeline;
pub mod recipe;
pub mod state;
pub mod step;

mod tasks;
pub(crate) mod util;

pub use artbox_shared::{ArtboxError, ArtboxResult};
pub use config::ProvisionConfig;
pub use host::Host;
pub use pipeline::{CancelFlag, Pipeline, PipelineBuilder, PipelineExecutor, StepFailure};
pub use state::{EnvironmentState, Image};
