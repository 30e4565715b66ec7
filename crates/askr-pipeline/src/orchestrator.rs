use crate::template::{PromptTemplate, INPUT, PREVIOUS};
use askr_agent::SessionDriver;
use askr_config::{compose, ConfigSource};
use askr_core::{AskrError, AskrResult};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{error, info};

/// One step: its configuration layers and prompt template.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    /// Unique step name.
    pub name: String,
    /// Documents composed for this step, in order.
    pub sources: Vec<ConfigSource>,
    /// Prompt template text.
    pub prompt: String,
}

impl PipelineStep {
    /// A step named `name`.
    pub fn new(
        name: impl Into<String>,
        sources: Vec<ConfigSource>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sources,
            prompt: prompt.into(),
        }
    }
}

/// How far a step got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Ran to a final answer.
    Completed,
    /// Ended in a fatal error.
    Failed,
    /// Skipped because an earlier step failed.
    NotRun,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::NotRun => "not run",
        };
        f.write_str(name)
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Final status.
    pub status: StepStatus,
    /// Output of a completed step.
    pub output: Option<String>,
}

/// Outcome of a whole pipeline.
#[derive(Debug)]
pub struct PipelineReport {
    /// One entry per step, in order.
    pub steps: Vec<StepReport>,
    /// The fatal error that stopped the pipeline, tagged with its step.
    pub failure: Option<AskrError>,
}

impl PipelineReport {
    /// Whether every step completed.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Output of the last step, when every step completed.
    pub fn output(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.steps.last().and_then(|s| s.output.as_deref())
    }

    /// Output of a named step, if it completed.
    pub fn step_output(&self, name: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.output.as_deref())
    }

    /// The final output, or the failure.
    pub fn into_result(self) -> AskrResult<String> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self
                .steps
                .into_iter()
                .last()
                .and_then(|s| s.output)
                .unwrap_or_default()),
        }
    }
}

/// Runs steps in order, each as its own session with its own servers.
pub struct PipelineOrchestrator {
    driver: SessionDriver,
}

impl PipelineOrchestrator {
    /// Orchestrator running every step through `driver`.
    pub fn new(driver: SessionDriver) -> Self {
        Self { driver }
    }

    /// Run `steps` with `input` bound to `{{input}}`.
    ///
    /// The first fatal error stops the pipeline; later steps are reported as
    /// [`StepStatus::NotRun`] and never started.
    pub async fn run(&self, steps: &[PipelineStep], input: &str) -> PipelineReport {
        let started = Instant::now();
        info!(steps = steps.len(), "pipeline starting");

        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert(INPUT.to_string(), input.to_string());
        let mut reports: Vec<StepReport> = steps
            .iter()
            .map(|s| StepReport {
                name: s.name.clone(),
                status: StepStatus::NotRun,
                output: None,
            })
            .collect();
        let mut failure = None;

        for (step, report) in steps.iter().zip(reports.iter_mut()) {
            info!(step = %step.name, "pipeline step starting");
            match self.run_step(step, &vars).await {
                Ok(output) => {
                    report.status = StepStatus::Completed;
                    report.output = Some(output.clone());
                    vars.insert(step.name.clone(), output.clone());
                    vars.insert(PREVIOUS.to_string(), output);
                    info!(step = %step.name, "pipeline step completed");
                }
                Err(e) => {
                    error!(step = %step.name, error = %e, "pipeline step failed, aborting");
                    report.status = StepStatus::Failed;
                    failure = Some(AskrError::Pipeline {
                        step: step.name.clone(),
                        source: Box::new(e),
                    });
                    break;
                }
            }
        }

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            completed = reports
                .iter()
                .filter(|r| r.status == StepStatus::Completed)
                .count(),
            "pipeline finished"
        );
        PipelineReport {
            steps: reports,
            failure,
        }
    }

    async fn run_step(
        &self,
        step: &PipelineStep,
        vars: &HashMap<String, String>,
    ) -> AskrResult<String> {
        let config = compose(&step.sources)?;
        let prompt = PromptTemplate::parse(&step.prompt)?.render(vars)?;
        let report = self.driver.run(&config, &prompt, Some(&step.name)).await;
        report.result
    }
}
