use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub index: usize,
    pub name: String,
    pub kind: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub steps: Vec<StepMetrics>,
}

impl PipelineMetrics {
    pub fn step_duration_ms(&self, name: &str) -> Option<u128> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| step.duration_ms)
    }

    /// Emit one summary line per step.
    pub fn log_steps(&self) {
        for step in &self.steps {
            tracing::info!(
                index = step.index,
                step = %step.name,
                kind = %step.kind,
                duration_ms = step.duration_ms as u64,
                "Step timing"
            );
        }
        tracing::info!(
            total_duration_ms = self.total_duration_ms as u64,
            steps = self.steps.len(),
            "Pipeline finished"
        );
    }
}
