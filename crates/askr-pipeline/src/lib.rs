//! Fixed sequences of agent sessions where each step feeds the next.
//!
//! Every step composes its own configuration, gets its own tool servers and
//! tears them down before the next step starts.

/// Pipeline definition files.
pub mod definition;
/// Step execution and reporting.
pub mod orchestrator;
/// `{{name}}` prompt templates.
pub mod template;

pub use definition::{PipelineDefinition, StepDefinition};
pub use orchestrator::{PipelineOrchestrator, PipelineReport, PipelineStep, StepReport, StepStatus};
pub use template::PromptTemplate;
