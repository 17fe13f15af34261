//! Sequential, fail-fast pipeline execution.

use super::metrics::{PipelineMetrics, StepMetrics};
use super::task::StepRunner;
use super::validate::validate;
use crate::state::{EnvironmentState, Image};
use crate::step::{Privilege, Step};
use artbox_shared::{ArtboxError, ArtboxResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;

/// Validated, immutable step sequence.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step that drops to the runtime identity, if any.
    pub fn identity_drop_index(&self) -> Option<usize> {
        self.steps.iter().position(Step::is_identity_drop)
    }
}

/// Collects steps and validates them into a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Run the static ordering and privilege checks.
    pub fn build(self) -> ArtboxResult<Pipeline> {
        validate(&self.steps)?;
        Ok(Pipeline { steps: self.steps })
    }
}

/// Operator-triggered abort, observed before each step starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// First step that failed; the run produced no image.
#[derive(Debug, Error)]
#[error("step {} '{step}' ({kind}) failed: {source}", .index + 1)]
pub struct StepFailure {
    /// Zero-based position in the pipeline.
    pub index: usize,
    pub step: String,
    pub kind: &'static str,
    #[source]
    pub source: ArtboxError,
}

impl StepFailure {
    fn new(index: usize, step: &Step, source: ArtboxError) -> Self {
        Self {
            index,
            step: step.name().to_string(),
            kind: step.kind(),
            source,
        }
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute every step in order against `state`.
    ///
    /// The first failure stops the run: no later step is invoked and no
    /// image is returned. A step's output is folded into `state` only after
    /// it succeeded. There are no retries and no timeouts here; blocking
    /// bounds are whatever the invoked tools enforce.
    pub async fn run(
        pipeline: &Pipeline,
        runner: &dyn StepRunner,
        state: &mut EnvironmentState,
        cancel: &CancelFlag,
    ) -> Result<Image, StepFailure> {
        let run_id = ulid::Ulid::new().to_string();
        let total_start = Instant::now();
        let mut step_metrics = Vec::with_capacity(pipeline.len());

        tracing::info!(
            run_id = %run_id,
            steps = pipeline.len(),
            base_image = %state.base_image(),
            root = %state.root().display(),
            "Starting provisioning run"
        );

        for (index, step) in pipeline.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(index = index + 1, step = %step.name(), "Run cancelled");
                return Err(StepFailure::new(
                    index,
                    step,
                    ArtboxError::Cancelled(step.name().to_string()),
                ));
            }

            if step.privilege() == Privilege::Required && !state.phase().is_privileged() {
                return Err(StepFailure::new(
                    index,
                    step,
                    ArtboxError::Validation(format!(
                        "step '{}' requires elevated privilege after identity drop",
                        step.name()
                    )),
                ));
            }

            let span = tracing::info_span!(
                "step",
                index = index + 1,
                step = %step.name(),
                kind = step.kind()
            );
            let step_start = Instant::now();

            let result = async {
                tracing::info!("Starting step");
                runner.run(step, state).await
            }
            .instrument(span.clone())
            .await;

            let output = result.map_err(|e| {
                span.in_scope(|| {
                    tracing::error!(error_class = e.class(), "Step failed: {}", e);
                });
                StepFailure::new(index, step, e)
            })?;

            state
                .apply(output)
                .map_err(|e| StepFailure::new(index, step, e))?;

            let duration_ms = step_start.elapsed().as_millis();
            span.in_scope(|| tracing::info!(duration_ms = duration_ms as u64, "Step complete"));
            step_metrics.push(StepMetrics {
                index,
                name: step.name().to_string(),
                kind: step.kind().to_string(),
                duration_ms,
            });
        }

        let metrics = PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            steps: step_metrics,
        };
        metrics.log_steps();

        Ok(Image::from_state(state, run_id, metrics))
    }
}
