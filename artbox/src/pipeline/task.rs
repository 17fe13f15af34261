//! Seam between the executor and whatever performs step effects.

use crate::state::{EnvironmentState, StepOutput};
use crate::step::Step;
use artbox_shared::ArtboxResult;
use async_trait::async_trait;

/// Performs the effects of a single step.
///
/// Implementations read the current state and return the mutations to
/// apply. They must not assume the output is applied until they return
/// `Ok`. [`crate::host::Host`] is the real implementation; tests substitute
/// recording fakes.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &Step, state: &EnvironmentState) -> ArtboxResult<StepOutput>;
}
