use crate::llm::{LlmClient, ModelAdapter};
use crate::runtime::AgentRuntime;
use askr_config::{MergedConfig, ModelDescriptor};
use askr_core::{AskrError, AskrResult};
use askr_mcp::{
    ConnectorFactory, ServerLifecycleManager, ServerStatus, ToolCatalog,
    DEFAULT_STARTUP_PARALLELISM,
};
use askr_session::{Session, TranscriptStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Builds the model adapter for a session.
pub trait ModelFactory: Send + Sync {
    /// Adapter for `descriptor`.
    fn create(&self, descriptor: &ModelDescriptor) -> AskrResult<Arc<dyn ModelAdapter>>;
}

impl<F> ModelFactory for F
where
    F: Fn(&ModelDescriptor) -> AskrResult<Arc<dyn ModelAdapter>> + Send + Sync,
{
    fn create(&self, descriptor: &ModelDescriptor) -> AskrResult<Arc<dyn ModelAdapter>> {
        self(descriptor)
    }
}

/// The provider HTTP backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpModelFactory;

impl ModelFactory for HttpModelFactory {
    fn create(&self, descriptor: &ModelDescriptor) -> AskrResult<Arc<dyn ModelAdapter>> {
        Ok(Arc::new(LlmClient::from_descriptor(descriptor)?))
    }
}

/// Final state of one configured server.
#[derive(Debug, Clone)]
pub struct ServerSummary {
    /// Server name.
    pub name: String,
    /// Status reached before teardown.
    pub status: ServerStatus,
    /// Startup error, for failed servers.
    pub error: Option<String>,
}

/// Everything one session produced.
#[derive(Debug)]
pub struct SessionReport {
    /// The conversation, including partial turns of a failed run.
    pub session: Session,
    /// Status each server reached before teardown.
    pub servers: Vec<ServerSummary>,
    /// Degraded-mode warnings (dropped duplicate tools).
    pub warnings: Vec<String>,
    /// The final answer, or the fatal error.
    pub result: AskrResult<String>,
}

impl SessionReport {
    /// The final answer, when the run succeeded.
    pub fn output(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }
}

/// Runs one agent session: servers up, catalog, agent loop, servers down.
///
/// Teardown always happens, whether the loop finished, failed, or the
/// cancellation token fired mid-startup or mid-call.
pub struct SessionDriver {
    models: Arc<dyn ModelFactory>,
    connectors: Option<Arc<dyn ConnectorFactory>>,
    transcript: Option<Arc<dyn TranscriptStore>>,
    cancel: CancellationToken,
    max_parallel: usize,
}

impl SessionDriver {
    /// Driver using the real model backends and transports.
    pub fn new() -> Self {
        Self {
            models: Arc::new(HttpModelFactory),
            connectors: None,
            transcript: None,
            cancel: CancellationToken::new(),
            max_parallel: DEFAULT_STARTUP_PARALLELISM,
        }
    }

    /// Build model adapters through `models`.
    pub fn with_models(mut self, models: Arc<dyn ModelFactory>) -> Self {
        self.models = models;
        self
    }

    /// Build tool-server connectors through `connectors`.
    pub fn with_connectors(mut self, connectors: Arc<dyn ConnectorFactory>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    /// Append every session to `store`.
    pub fn with_transcript(mut self, store: Arc<dyn TranscriptStore>) -> Self {
        self.transcript = Some(store);
        self
    }

    /// Abort the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cap concurrent server startups.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// The token this driver watches.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `prompt` against `config`. `step` tags the session when it is
    /// part of a pipeline.
    pub async fn run(
        &self,
        config: &MergedConfig,
        prompt: &str,
        step: Option<&str>,
    ) -> SessionReport {
        let mut session = Session::new(&config.agent.name);
        if let Some(step) = step {
            session = session.for_step(step);
        }
        self.execute(config, session, prompt).await
    }

    /// Continue `session`, a conversation saved by an earlier run: its turns
    /// are replayed to the model ahead of `prompt`, and the new turns are
    /// appended to it.
    pub async fn resume(
        &self,
        config: &MergedConfig,
        mut session: Session,
        prompt: &str,
    ) -> SessionReport {
        info!(
            session_id = %session.id,
            prior_turns = session.message_count(),
            "resuming session"
        );
        session.agent = config.agent.name.clone();
        self.execute(config, session, prompt).await
    }

    async fn execute(
        &self,
        config: &MergedConfig,
        mut session: Session,
        prompt: &str,
    ) -> SessionReport {
        let mut manager = match &self.connectors {
            Some(factory) => ServerLifecycleManager::with_factory(factory.clone()),
            None => ServerLifecycleManager::new(),
        }
        .with_max_parallel(self.max_parallel);
        let mut warnings = Vec::new();

        let result = if self.cancel.is_cancelled() {
            Err(AskrError::Cancelled("run cancelled before start".into()))
        } else {
            let work = drive(
                self.models.as_ref(),
                config,
                prompt,
                &mut manager,
                &mut session,
                &mut warnings,
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    warn!("session cancelled, tearing down tool servers");
                    Err(AskrError::Cancelled("run cancelled".into()))
                }
                result = work => result,
            }
        };

        let servers = manager
            .servers()
            .iter()
            .map(|s| ServerSummary {
                name: s.name().to_string(),
                status: s.status(),
                error: s.last_error().map(str::to_string),
            })
            .collect();
        manager.stop().await;

        if let Some(store) = &self.transcript {
            let error = result.as_ref().err().map(ToString::to_string);
            if let Err(e) = store
                .record(&session, Some(&config.agent.instructions), error.as_deref())
                .await
            {
                error!(error = %e, "failed to write transcript");
            }
        }

        match &result {
            Ok(_) => info!(session_id = %session.id, "session completed"),
            Err(e) => warn!(session_id = %session.id, error = %e, "session failed"),
        }

        SessionReport {
            session,
            servers,
            warnings,
            result,
        }
    }
}

impl Default for SessionDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(
    models: &dyn ModelFactory,
    config: &MergedConfig,
    prompt: &str,
    manager: &mut ServerLifecycleManager,
    session: &mut Session,
    warnings: &mut Vec<String>,
) -> AskrResult<String> {
    let descriptor = config.model_descriptor()?;
    let model = models.create(&descriptor)?;

    let catalog = if config.llm.use_tools {
        manager.start(config).await;
        let catalog = ToolCatalog::build(manager.servers());
        warnings.extend(catalog.warnings().iter().cloned());
        info!(
            servers = manager.servers().len(),
            ready = manager.ready_count(),
            tools = catalog.len(),
            "tool catalog built"
        );
        catalog
    } else {
        info!("llm.use_tools is false, no tool servers started");
        ToolCatalog::default()
    };

    if config.agent.require_tools && manager.ready_count() == 0 {
        return Err(AskrError::connection(
            "all",
            "no tool server is ready and agent.require_tools is set",
        ));
    }

    let manager: &ServerLifecycleManager = manager;
    let mut runtime = AgentRuntime::new(
        model.as_ref(),
        &catalog,
        manager,
        config.agent.instructions.clone(),
        config.agent.max_iterations,
    );
    runtime.run(session, prompt).await
}
