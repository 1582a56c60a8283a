use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Passed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
    pub elapsed: Duration,
}

impl StepOutcome {
    pub fn passed(name: &str, elapsed: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Passed,
            elapsed,
        }
    }

    pub fn failed(name: &str, elapsed: Duration, error: String) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Failed(error),
            elapsed,
        }
    }

    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            elapsed: Duration::ZERO,
        }
    }
}

/// Per-step results of one flow run.
#[derive(Debug, Clone)]
pub struct FlowReport {
    name: String,
    steps: Vec<StepOutcome>,
}

impl FlowReport {
    pub fn new(name: &str, steps: Vec<StepOutcome>) -> Self {
        Self {
            name: name.to_string(),
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    pub fn passed(&self) -> bool {
        self.failed_step().is_none()
    }

    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|step| matches!(step.status, StepStatus::Failed(_)))
    }

    pub fn summary(&self) -> String {
        let count = |wanted: fn(&StepStatus) -> bool| {
            self.steps.iter().filter(|s| wanted(&s.status)).count()
        };
        format!(
            "{} passed, {} failed, {} skipped",
            count(|s| *s == StepStatus::Passed),
            count(|s| matches!(s, StepStatus::Failed(_))),
            count(|s| *s == StepStatus::Skipped),
        )
    }

    /// Panics with the failing step so the enclosing test reports it.
    #[track_caller]
    pub fn assert_passed(&self) {
        if let Some(step) = self.failed_step() {
            let error = match &step.status {
                StepStatus::Failed(error) => error.as_str(),
                _ => "",
            };
            panic!(
                "flow \"{}\" failed at step \"{}\": {error}",
                self.name, step.name
            );
        }
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Flow \"{}\" ({})", self.name, self.summary())?;
        for step in &self.steps {
            match &step.status {
                StepStatus::Passed => {
                    writeln!(f, "  PASS  {} ({:.2?})", step.name, step.elapsed)?
                }
                StepStatus::Failed(error) => writeln!(
                    f,
                    "  FAIL  {} ({:.2?}): {error}",
                    step.name, step.elapsed
                )?,
                StepStatus::Skipped => writeln!(f, "  SKIP  {}", step.name)?,
            }
        }
        Ok(())
    }
}
