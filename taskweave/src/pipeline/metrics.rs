use crate::pipeline::ExecutionMode;

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub name: String,
    pub duration_ms: u128,
    pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct PhaseMetrics {
    pub execution: ExecutionMode,
    pub duration_ms: u128,
    pub steps: Vec<StepMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub phases: Vec<PhaseMetrics>,
}

impl PipelineMetrics {
    pub fn step_duration_ms(&self, name: &str) -> Option<u128> {
        self.steps()
            .find(|step| step.name == name)
            .map(|step| step.duration_ms)
    }

    /// Names of steps that returned an error, in execution order.
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps()
            .filter(|step| step.failed)
            .map(|step| step.name.as_str())
            .collect()
    }

    /// Number of steps that actually ran.
    pub fn steps_run(&self) -> usize {
        self.steps().count()
    }

    fn steps(&self) -> impl Iterator<Item = &StepMetrics> {
        self.phases.iter().flat_map(|phase| phase.steps.iter())
    }
}
