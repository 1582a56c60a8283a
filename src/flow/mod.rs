//! Sequential step runner for certification flows.
//!
//! A [`Flow`] is a named, ordered list of async steps. Steps run strictly in
//! order against a shared [`FlowContext`]; the first failing step stops the
//! flow and every remaining step is reported as skipped. Sidecars registered
//! on the context during the flow are shut down once the flow ends, whatever
//! its outcome.

pub mod context;
pub mod report;

use anyhow::Result;
use futures::future::BoxFuture;
use log::{error, info};
use std::future::Future;
use std::time::Instant;

pub use context::{FlowContext, FlowSidecar};
pub use report::{FlowReport, StepOutcome, StepStatus};

type StepFn = Box<dyn FnOnce(FlowContext) -> BoxFuture<'static, Result<()>> + Send>;

/// A named unit of work in a flow.
pub struct Step {
    name: String,
    run: StepFn,
}

impl Step {
    pub fn new<F, Fut>(name: &str, step: F) -> Self
    where
        F: FnOnce(FlowContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            run: Box::new(move |ctx| Box::pin(step(ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Builder and runner for one named flow.
#[derive(Debug)]
pub struct Flow {
    name: String,
    steps: Vec<Step>,
}

impl Flow {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    /// Appends a step built elsewhere, e.g. [`crate::sidecar::run`].
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a step from a closure.
    pub fn step<F, Fut>(self, name: &str, step: F) -> Self
    where
        F: FnOnce(FlowContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_step(Step::new(name, step))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    /// Runs every step in order and tears down the flow's sidecars.
    pub async fn run(self) -> FlowReport {
        let flow_name = self.name;
        info!("Flow \"{flow_name}\" starting with {} steps", self.steps.len());

        let ctx = FlowContext::new(&flow_name);
        let mut outcomes = Vec::with_capacity(self.steps.len());
        let mut failed = false;

        for step in self.steps {
            if failed {
                info!("Flow \"{flow_name}\": skipping step \"{}\"", step.name);
                outcomes.push(StepOutcome::skipped(&step.name));
                continue;
            }

            info!("Flow \"{flow_name}\": running step \"{}\"", step.name);
            let started = Instant::now();
            let result = (step.run)(ctx.clone()).await;
            let elapsed = started.elapsed();

            match result {
                Ok(()) => {
                    info!(
                        "Flow \"{flow_name}\": step \"{}\" passed in {elapsed:?}",
                        step.name
                    );
                    outcomes.push(StepOutcome::passed(&step.name, elapsed));
                }
                Err(e) => {
                    error!(
                        "Flow \"{flow_name}\": step \"{}\" failed after {elapsed:?}: {e:#}",
                        step.name
                    );
                    outcomes.push(StepOutcome::failed(&step.name, elapsed, format!("{e:#}")));
                    failed = true;
                }
            }
        }

        ctx.teardown().await;

        let report = FlowReport::new(&flow_name, outcomes);
        info!("Flow \"{flow_name}\" finished: {}", report.summary());
        report
    }
}
