use crate::orchestrator::PipelineStep;
use crate::template::{PromptTemplate, INPUT, PREVIOUS};
use askr_config::ConfigSource;
use askr_core::{AskrError, AskrResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A pipeline file:
///
/// ```yaml
/// base: [llm.yaml]
/// steps:
///   - name: research
///     config: [research.yaml]
///     prompt: "{{input}}"
///   - name: post
///     config: [post.yaml]
///     prompt: "<topic>{{input}}</topic><research>{{research}}</research>"
/// ```
///
/// Config paths are relative to the pipeline file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    /// Documents composed first into every step that inherits them.
    #[serde(default)]
    pub base: Vec<String>,
    /// Steps in execution order.
    pub steps: Vec<StepDefinition>,
}

/// One step of a [`PipelineDefinition`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Unique step name, usable as `{{name}}` in later prompts.
    pub name: String,
    /// Step-specific documents, composed after the base.
    #[serde(default)]
    pub config: Vec<String>,
    /// Prompt template.
    pub prompt: String,
    /// Whether the base documents apply to this step.
    #[serde(default = "default_true")]
    pub inherit_base: bool,
}

fn default_true() -> bool {
    true
}

impl PipelineDefinition {
    /// Parse a definition from YAML text.
    pub fn parse(text: &str) -> AskrResult<Self> {
        let definition: Self = serde_yaml::from_str(text)
            .map_err(|e| AskrError::Config(format!("Invalid pipeline definition: {e}")))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load a definition file. Returns it with the directory its paths are
    /// relative to.
    pub fn load(path: &Path) -> AskrResult<(Self, PathBuf)> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AskrError::Config(format!("Cannot read pipeline '{}': {e}", path.display()))
        })?;
        let definition = Self::parse(&text)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok((definition, dir))
    }

    fn validate(&self) -> AskrResult<()> {
        if self.steps.is_empty() {
            return Err(AskrError::Config("pipeline has no steps".into()));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            let name = step.name.trim();
            if name.is_empty() {
                return Err(AskrError::Config("pipeline step with an empty name".into()));
            }
            if name == INPUT || name == PREVIOUS {
                return Err(AskrError::Config(format!(
                    "step name '{name}' is reserved"
                )));
            }
            if !seen.insert(name) {
                return Err(AskrError::Config(format!("duplicate step name '{name}'")));
            }
            PromptTemplate::parse(&step.prompt).map_err(|e| AskrError::Pipeline {
                step: name.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    /// Resolve into runnable steps, config paths taken relative to `dir`.
    pub fn into_steps(self, dir: &Path) -> Vec<PipelineStep> {
        let base: Vec<ConfigSource> = self
            .base
            .iter()
            .map(|p| ConfigSource::file_relative_to(dir, p))
            .collect();
        self.steps
            .into_iter()
            .map(|step| {
                let mut sources = if step.inherit_base {
                    base.clone()
                } else {
                    Vec::new()
                };
                sources.extend(
                    step.config
                        .iter()
                        .map(|p| ConfigSource::file_relative_to(dir, p)),
                );
                PipelineStep::new(step.name.trim(), sources, step.prompt)
            })
            .collect()
    }
}
