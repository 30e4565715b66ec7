use crate::provider::{ModelDescriptor, Provider};
use crate::secret::SecretRef;
use crate::source::expand_home;
use askr_core::{AskrError, AskrResult};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_AGENT_NAME: &str = "askr";
const DEFAULT_MAX_ITERATIONS: u32 = 100;
const DEFAULT_CALL_TIMEOUT_SECS: f64 = 60.0;
const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 60.0;

// --- Raw document shapes -------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    agent: RawAgent,
    llm: RawLlm,
    #[serde(default)]
    mcp: Option<Mapping>,
    // Accepted so existing documents load, but not acted on.
    #[serde(default)]
    server: Option<Value>,
    #[serde(default)]
    trace: Option<Value>,
    #[serde(default)]
    embedder: Option<Value>,
    #[serde(default)]
    tools: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAgent {
    #[serde(default)]
    name: Option<String>,
    instructions: String,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    require_tools: bool,
    #[serde(default)]
    output_type: Option<Value>,
    #[serde(default)]
    input_type: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLlm {
    model: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default = "default_true")]
    use_tools: bool,
    #[serde(default)]
    max_history: usize,
    #[serde(default = "default_true")]
    compress_history: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServer {
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    tool_prefix: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    connect_timeout: Option<f64>,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
}

fn default_true() -> bool {
    true
}

// --- Typed configuration -------------------------------------------------

/// Transport discriminant, used for logging and connector selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Local subprocess speaking over its standard streams.
    Stdio,
    /// Server-sent events stream plus POST endpoint.
    Sse,
    /// Streamable HTTP.
    Http,
}

impl TransportKind {
    fn parse(raw: &str, server: &str) -> AskrResult<Self> {
        match raw {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "http" => Ok(Self::Http),
            other => Err(AskrError::Config(format!(
                "Server '{server}': unknown transport '{other}' (expected 'stdio', 'sse' or 'http')"
            ))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
        })
    }
}

/// Connection descriptor of one tool server.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    /// Spawn `program args...` and talk over stdin/stdout.
    Stdio {
        /// Executable, first element of `command`.
        program: String,
        /// Remaining argv.
        args: Vec<String>,
        /// Working directory for the child.
        cwd: Option<PathBuf>,
        /// Variables layered over the inherited environment.
        env: BTreeMap<String, String>,
    },
    /// Server-sent events.
    Sse {
        /// Event-stream URL.
        url: String,
        /// Extra request headers.
        headers: BTreeMap<String, String>,
    },
    /// Streamable HTTP.
    Http {
        /// Endpoint URL.
        url: String,
        /// Extra request headers.
        headers: BTreeMap<String, String>,
    },
}

impl Transport {
    /// The variant's discriminant.
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio { .. } => TransportKind::Stdio,
            Transport::Sse { .. } => TransportKind::Sse,
            Transport::Http { .. } => TransportKind::Http,
        }
    }
}

/// One entry under `mcp:`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Key under `mcp:`, unique within a merged configuration.
    pub name: String,
    /// How to reach the server.
    pub transport: Transport,
    /// Namespace prepended to the server's tool names.
    pub tool_prefix: Option<String>,
    /// Disabled servers are never started.
    pub enabled: bool,
    /// Deadline for a single tool call.
    pub call_timeout: Duration,
    /// Deadline for connect plus handshake.
    pub connect_timeout: Duration,
}

impl ServerConfig {
    /// A stdio server with default timeouts, mostly useful in tests.
    pub fn stdio(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Stdio {
                program: program.into(),
                args,
                cwd: None,
                env: BTreeMap::new(),
            },
            tool_prefix: None,
            enabled: true,
            call_timeout: Duration::from_secs_f64(DEFAULT_CALL_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs_f64(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    fn from_raw(name: &str, raw: RawServer) -> AskrResult<Self> {
        let kind = TransportKind::parse(raw.transport.as_deref().unwrap_or("stdio"), name)?;
        let transport = match kind {
            TransportKind::Stdio => {
                let mut argv = raw.command.unwrap_or_default().into_iter();
                let program = argv.next().filter(|p| !p.is_empty()).ok_or_else(|| {
                    AskrError::Config(format!(
                        "Server '{name}': stdio transport requires a non-empty 'command'"
                    ))
                })?;
                Transport::Stdio {
                    program,
                    args: argv.collect(),
                    cwd: raw.cwd.map(|c| expand_home(Path::new(&c))),
                    env: raw.env.unwrap_or_default(),
                }
            }
            TransportKind::Sse | TransportKind::Http => {
                let url = raw.url.filter(|u| !u.is_empty()).ok_or_else(|| {
                    AskrError::Config(format!(
                        "Server '{name}': {kind} transport requires a 'url'"
                    ))
                })?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(AskrError::Config(format!(
                        "Server '{name}': url '{url}' must start with http:// or https://"
                    )));
                }
                let headers = raw.headers.unwrap_or_default();
                if kind == TransportKind::Sse {
                    Transport::Sse { url, headers }
                } else {
                    Transport::Http { url, headers }
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            transport,
            tool_prefix: raw.tool_prefix.filter(|p| !p.is_empty()),
            enabled: raw.enabled.unwrap_or(true),
            call_timeout: seconds(
                raw.timeout.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
                &format!("mcp.{name}.timeout"),
            )?,
            connect_timeout: seconds(
                raw.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                &format!("mcp.{name}.connect_timeout"),
            )?,
        })
    }
}

/// The `agent:` section.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Display name, used in logs and transcripts.
    pub name: String,
    /// System instructions given to the model.
    pub instructions: String,
    /// Maximum number of model consultations per run.
    pub max_iterations: u32,
    /// Treat a run with no reachable tool server as a failure.
    pub require_tools: bool,
}

/// The `llm:` section, credential still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Provider parsed from the `provider:` prefix.
    pub provider: Provider,
    /// Model name after the prefix.
    pub model: String,
    /// Credential reference.
    pub api_key: Option<SecretRef>,
    /// Endpoint override.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Deadline for one model request.
    pub timeout: Option<Duration>,
    /// When false no tool servers are started.
    pub use_tools: bool,
    /// Most turns kept in a saved session file; 0 keeps all.
    pub max_history: usize,
    /// Drop tool requests and tool results before a session is saved.
    pub compress_history: bool,
}

/// The effective configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    /// Agent settings.
    pub agent: AgentConfig,
    /// Model settings.
    pub llm: LlmConfig,
    /// Tool servers in declaration order.
    pub servers: Vec<ServerConfig>,
    /// Recognised keys this build does not act on, as dotted paths.
    pub ignored: Vec<String>,
}

impl MergedConfig {
    /// Validate a merged document tree and build the typed configuration.
    pub fn from_value(value: Value) -> AskrResult<Self> {
        let raw: RawConfig = serde_yaml::from_value(value)
            .map_err(|e| AskrError::Config(format!("Invalid configuration: {e}")))?;

        let ignored: Vec<String> = [
            ("agent.output_type", raw.agent.output_type.is_some()),
            ("agent.input_type", raw.agent.input_type.is_some()),
            ("server", raw.server.is_some()),
            ("trace", raw.trace.is_some()),
            ("embedder", raw.embedder.is_some()),
            ("tools", raw.tools.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(key, _)| key.to_string())
        .collect();
        for key in &ignored {
            warn!(key = %key, "configuration key is not supported and is ignored");
        }

        let max_iterations = raw.agent.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(AskrError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        let agent = AgentConfig {
            name: raw
                .agent
                .name
                .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            instructions: raw.agent.instructions,
            max_iterations,
            require_tools: raw.agent.require_tools,
        };

        let (provider, model) = Provider::parse_descriptor(&raw.llm.model)?;
        let llm = LlmConfig {
            provider,
            model,
            api_key: raw.llm.api_key.as_deref().map(SecretRef::parse).transpose()?,
            base_url: raw.llm.base_url,
            temperature: raw.llm.temperature,
            max_tokens: raw.llm.max_tokens,
            timeout: raw
                .llm
                .timeout
                .map(|t| seconds(t, "llm.timeout"))
                .transpose()?,
            use_tools: raw.llm.use_tools,
            max_history: raw.llm.max_history,
            compress_history: raw.llm.compress_history,
        };

        let mut servers = Vec::new();
        for (key, value) in raw.mcp.unwrap_or_default() {
            let name = match key {
                Value::String(s) => s,
                other => {
                    return Err(AskrError::Config(format!(
                        "Server names under 'mcp' must be strings, got {other:?}"
                    )))
                }
            };
            let raw_server: RawServer = match value {
                Value::Null => RawServer::default(),
                other => serde_yaml::from_value(other)
                    .map_err(|e| AskrError::Config(format!("Server '{name}': {e}")))?,
            };
            servers.push(ServerConfig::from_raw(&name, raw_server)?);
        }

        Ok(Self {
            agent,
            llm,
            servers,
            ignored,
        })
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Servers with `enabled: true`, in declaration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Resolve the credential and produce the immutable model descriptor.
    pub fn model_descriptor(&self) -> AskrResult<ModelDescriptor> {
        let api_key = self.llm.api_key.as_ref().map(SecretRef::resolve).transpose()?;
        if api_key.is_none() && self.llm.provider.requires_api_key() {
            return Err(AskrError::Config(format!(
                "llm.api_key is required for provider '{}'",
                self.llm.provider
            )));
        }
        let base_url = self
            .llm
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.llm.provider.default_base_url())
            .trim_end_matches('/')
            .to_string();
        Ok(ModelDescriptor {
            provider: self.llm.provider,
            model: self.llm.model.clone(),
            api_key,
            base_url,
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            timeout: self.llm.timeout,
        })
    }
}

fn seconds(value: f64, key: &str) -> AskrResult<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(AskrError::Config(format!(
            "{key} must be a positive number of seconds, got {value}"
        )));
    }
    Ok(Duration::from_secs_f64(value))
}
