//! `askr`: run an AI agent with MCP tool servers, configured by layered YAML.

use anyhow::Context;
use askr_agent::SessionDriver;
use askr_config::source::expand_home;
use askr_config::{compose, ConfigSource};
use askr_core::AskrError;
use askr_pipeline::{PipelineDefinition, PipelineOrchestrator};
use askr_session::{FileTranscriptStore, Session, SessionFile};
use clap::{ArgAction, Parser};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_NO_TOOLS: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "askr",
    version,
    about = "Run an AI agent with MCP tool servers from layered YAML configs"
)]
struct Cli {
    /// Config files, composed left to right. Repeat the flag or separate with commas.
    #[arg(
        short,
        long,
        value_name = "PATH",
        value_delimiter = ',',
        default_value = ".askr.yaml"
    )]
    config: Vec<PathBuf>,

    /// Replace agent.instructions.
    #[arg(short = 's', long, value_name = "TEXT")]
    system_prompt: Option<String>,

    /// Append full transcripts to a JSONL file (default askr-log.jsonl).
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "askr-log.jsonl"
    )]
    logs: Option<PathBuf>,

    /// Abort the whole run after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Keep the conversation in FILE: earlier turns are sent along with the
    /// prompt and the new ones are saved back after a successful run.
    #[arg(short = 'S', long, value_name = "FILE")]
    session: Option<PathBuf>,

    /// Run a pipeline definition instead of a single agent. Each step names
    /// its own config files.
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["config", "system_prompt", "session"]
    )]
    pipeline: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// The prompt. Read from stdin when omitted.
    prompt: Vec<String>,
}

impl Cli {
    fn sources(&self) -> Vec<ConfigSource> {
        let mut sources: Vec<ConfigSource> =
            self.config.iter().cloned().map(ConfigSource::File).collect();
        if let Some(instructions) = &self.system_prompt {
            sources.push(ConfigSource::instructions_override(instructions.clone()));
        }
        sources
    }

    fn deadline(&self) -> anyhow::Result<Option<Duration>> {
        match self.timeout {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => anyhow::bail!("--timeout must be a positive number of seconds, got {secs}"),
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Map a fatal error to the process exit status.
fn exit_code(err: &AskrError) -> u8 {
    match err {
        AskrError::Pipeline { source, .. } => exit_code(source),
        AskrError::Config(_) => EXIT_USAGE,
        AskrError::Connection { .. } => EXIT_NO_TOOLS,
        AskrError::Cancelled(_) => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

async fn read_prompt(words: &[String]) -> anyhow::Result<String> {
    let mut prompt = words.join(" ");
    if prompt.trim().is_empty() && !std::io::stdin().is_terminal() {
        tokio::io::stdin()
            .read_to_string(&mut prompt)
            .await
            .context("failed to read prompt from stdin")?;
    }
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("no prompt given: pass it as arguments or on stdin");
    }
    Ok(prompt)
}

/// Cancel `token` on Ctrl-C or when `deadline` elapses. The returned flag
/// tells which one fired.
fn watch_cancellation(token: &CancellationToken, deadline: Option<Duration>) -> Arc<AtomicBool> {
    let timed_out = Arc::new(AtomicBool::new(false));

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    if let Some(deadline) = deadline {
        let on_deadline = token.clone();
        let flag = timed_out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(seconds = deadline.as_secs_f64(), "run deadline reached");
            flag.store(true, Ordering::SeqCst);
            on_deadline.cancel();
        });
    }

    timed_out
}

fn report_failure(err: &AskrError, timed_out: bool) -> ExitCode {
    let code = exit_code(err);
    if code == EXIT_CANCELLED && timed_out {
        eprintln!("askr: timed out ({err})");
    } else {
        eprintln!("askr: {err}");
    }
    ExitCode::from(code)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let deadline = cli.deadline()?;
    let prompt = read_prompt(&cli.prompt).await?;

    let token = CancellationToken::new();
    let timed_out = watch_cancellation(&token, deadline);
    let mut driver = SessionDriver::new().with_cancellation(token);
    if let Some(path) = &cli.logs {
        let store = FileTranscriptStore::new(path)
            .await
            .with_context(|| format!("cannot open transcript file '{}'", path.display()))?;
        info!(path = %path.display(), "writing transcripts");
        driver = driver.with_transcript(Arc::new(store));
    }

    if let Some(pipeline) = &cli.pipeline {
        let (definition, dir) = match PipelineDefinition::load(pipeline) {
            Ok(loaded) => loaded,
            Err(e) => return Ok(report_failure(&e, false)),
        };
        let steps = definition.into_steps(&dir);
        let report = PipelineOrchestrator::new(driver).run(&steps, &prompt).await;
        for step in &report.steps {
            eprintln!("### {}: {}", step.name, step.status);
        }
        return Ok(match report.into_result() {
            Ok(output) => {
                println!("{output}");
                ExitCode::SUCCESS
            }
            Err(e) => report_failure(&e, timed_out.load(Ordering::SeqCst)),
        });
    }

    let config = match compose(&cli.sources()) {
        Ok(config) => config,
        Err(e) => return Ok(report_failure(&e, false)),
    };
    let history = cli.session.as_deref().map(|p| SessionFile::new(expand_home(p)));
    let report = match &history {
        Some(file) => {
            let session = match file.load().await {
                Ok(saved) => saved.unwrap_or_else(|| Session::new(&config.agent.name)),
                Err(e) => return Ok(report_failure(&e, false)),
            };
            driver.resume(&config, session, &prompt).await
        }
        None => driver.run(&config, &prompt, None).await,
    };
    for warning in &report.warnings {
        eprintln!("askr: warning: {warning}");
    }
    let output = match report.result {
        Ok(output) => output,
        Err(e) => return Ok(report_failure(&e, timed_out.load(Ordering::SeqCst))),
    };
    println!("{output}");

    if let Some(file) = &history {
        let mut session = report.session;
        session.compact(config.llm.compress_history, config.llm.max_history);
        if let Err(e) = file.save(&session).await {
            eprintln!(
                "askr: failed to save session to '{}': {e}",
                file.path().display()
            );
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("askr: {e:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}
