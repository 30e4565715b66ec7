use super::{Pending, RpcTransport};
use crate::error::RpcError;
use crate::protocol::{Inbound, JsonRpcNotification, JsonRpcReply, JsonRpcRequest};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long `close()` waits for the child to exit after stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Deadline for writes that carry no caller timeout (notifications, replies).
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

struct Process {
    child: Child,
    tasks: Vec<JoinHandle<()>>,
}

/// Write end of the child's stdin, locked separately from the process so a
/// writer stuck on a full pipe never blocks `close()`.
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// Newline-delimited JSON-RPC over a child process's standard streams.
pub struct StdioTransport {
    server: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    process: Mutex<Option<Process>>,
    stdin: SharedStdin,
    pending: Pending,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Describe the child to spawn; nothing runs until [`RpcTransport::open`].
    pub fn new(
        server: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            server: server.into(),
            program: program.into(),
            args,
            cwd,
            env,
            process: Mutex::new(None),
            stdin: Arc::new(Mutex::new(None)),
            pending: Pending::default(),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// OS process id of the running child, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.child.id())
    }

    /// Write one message. A failed or timed out write leaves a partial line
    /// in the pipe, so the channel is no longer usable afterwards.
    async fn send<T: Serialize>(&self, message: &T, timeout: Duration) -> Result<(), RpcError> {
        let result = write_line(&self.stdin, message, timeout).await;
        if let Err(e) = &result {
            if !matches!(e, RpcError::Protocol(_)) {
                warn!(server = %self.server, error = %e, "write to MCP server failed");
                self.alive.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    /// Check whether the child has exited and record it.
    async fn refresh_liveness(&self) {
        let mut guard = self.process.lock().await;
        if let Some(process) = guard.as_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                warn!(server = %self.server, %status, "MCP server process exited");
                self.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

async fn write_line<T: Serialize>(
    stdin: &Mutex<Option<ChildStdin>>,
    message: &T,
    timeout: Duration,
) -> Result<(), RpcError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| RpcError::Protocol(format!("failed to serialize message: {e}")))?;
    line.push('\n');

    let write = async {
        let mut guard = stdin.lock().await;
        let pipe = guard
            .as_mut()
            .ok_or_else(|| RpcError::Closed("process not running".into()))?;
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        }
        .await;
        written.map_err(|e| RpcError::Closed(format!("failed to write to stdin: {e}")))
    };
    tokio::time::timeout(timeout, write)
        .await
        .unwrap_or(Err(RpcError::Timeout(timeout)))
}

#[async_trait]
impl RpcTransport for StdioTransport {
    async fn open(&self) -> Result<(), RpcError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RpcError::Transport(format!("failed to spawn '{}': {}", self.program, e))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Transport("child stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Transport("child stdout not available".into()))?;
        let stderr = child.stderr.take();

        info!(
            server = %self.server,
            program = %self.program,
            pid = child.id().unwrap_or_default(),
            "MCP server process spawned"
        );

        let mut tasks = Vec::new();

        let pending = self.pending.clone();
        let alive = self.alive.clone();
        let server = self.server.clone();
        let replies = self.stdin.clone();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match Inbound::parse(trimmed) {
                            Ok(Inbound::Response(resp)) => pending.complete(resp).await,
                            Ok(Inbound::Request { id, method }) => {
                                debug!(server = %server, method = %method, "<- server request");
                                let reply = JsonRpcReply::to_server_request(id, &method);
                                if let Err(e) = write_line(&replies, &reply, WRITE_TIMEOUT).await {
                                    warn!(server = %server, error = %e, "failed to answer server request");
                                }
                            }
                            Ok(Inbound::Notification { method }) => {
                                debug!(server = %server, method = %method, "ignoring server notification");
                            }
                            Err(e) => {
                                debug!(server = %server, line = %trimmed, error = %e, "non JSON-RPC line on stdout");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(server = %server, "MCP server stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(server = %server, error = %e, "error reading MCP server stdout");
                        break;
                    }
                }
            }
            alive.store(false, Ordering::SeqCst);
            pending.fail_all().await;
        }));

        if let Some(stderr) = stderr {
            let server = self.server.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "stderr: {line}");
                }
            }));
        }

        *self.stdin.lock().await = Some(stdin);
        *self.process.lock().await = Some(Process { child, tasks });
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if !self.is_alive() {
            return Err(RpcError::Closed("process not running".into()));
        }
        let started = Instant::now();
        let (id, rx) = self.pending.register().await;
        debug!(server = %self.server, id, method, "-> request");
        if let Err(e) = self
            .send(&JsonRpcRequest::new(id, method, params), timeout)
            .await
        {
            self.pending.forget(id).await;
            return Err(e);
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        match self.pending.wait(id, rx, remaining).await {
            Err(RpcError::Timeout(_)) => {
                self.refresh_liveness().await;
                Err(RpcError::Timeout(timeout))
            }
            other => other,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.send(&JsonRpcNotification::new(method, params), WRITE_TIMEOUT)
            .await
    }

    async fn close(&self) {
        let Some(mut process) = self.process.lock().await.take() else {
            return;
        };
        self.alive.store(false, Ordering::SeqCst);

        // EOF on stdin is the MCP shutdown signal for stdio servers. A writer
        // stuck on a full pipe still holds stdin; the kill below releases it.
        let eof_sent = match self.stdin.try_lock() {
            Ok(mut stdin) => stdin.take().is_some(),
            Err(_) => false,
        };
        let exited = if eof_sent {
            match tokio::time::timeout(SHUTDOWN_GRACE, process.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.server, %status, "MCP server exited");
                    true
                }
                Ok(Err(e)) => {
                    warn!(server = %self.server, error = %e, "failed waiting for MCP server");
                    false
                }
                Err(_) => {
                    warn!(server = %self.server, "MCP server ignored shutdown, killing");
                    false
                }
            }
        } else {
            false
        };
        if !exited {
            if let Err(e) = process.child.kill().await {
                warn!(server = %self.server, error = %e, "failed to kill MCP server");
            }
            if let Ok(mut stdin) = self.stdin.try_lock() {
                stdin.take();
            }
        }

        for task in process.tasks {
            task.abort();
        }
        self.pending.fail_all().await;
        info!(server = %self.server, "MCP server process stopped");
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn can_reconnect(&self) -> bool {
        false
    }
}
