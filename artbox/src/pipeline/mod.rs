//! Ordered, fail-fast step execution.
//!
//! ## Architecture
//!
//! ```text
//! PipelineBuilder ──validate──→ Pipeline ──PipelineExecutor::run──→ Image
//!                                   │
//!                                   └─ Step 1 → Step 2 → ... → Step N
//!                                      (each via StepRunner, output applied
//!                                       to EnvironmentState on success)
//! ```
//!
//! Steps run one at a time in declaration order. The first failure aborts the
//! run with a [`StepFailure`] and no image. The run starts in
//! [`Phase::Privileged`] and moves to [`Phase::Unprivileged`] once, when the
//! runtime identity is created.
//!
//! ## Example
//!
//! ```ignore
//! use artbox::pipeline::{CancelFlag, PipelineBuilder, PipelineExecutor};
//! use artbox::state::EnvironmentState;
//!
//! let pipeline = PipelineBuilder::from_steps(steps).build()?;
//! let mut state = EnvironmentState::new("/", "/build/context");
//! let image = PipelineExecutor::run(&pipeline, &host, &mut state, &CancelFlag::new()).await?;
//! println!("installed {} packages", image.packages.len());
//! ```

mod metrics;
mod phase;
#[allow(clippy::module_inception)]
mod pipeline;
mod task;
pub mod validate;

pub use metrics::{PipelineMetrics, StepMetrics};
pub use phase::Phase;
pub use pipeline::{CancelFlag, Pipeline, PipelineBuilder, PipelineExecutor, StepFailure};
pub use task::StepRunner;
