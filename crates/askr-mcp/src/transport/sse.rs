use super::{Pending, RpcTransport};
use crate::error::RpcError;
use crate::protocol::{Inbound, JsonRpcNotification, JsonRpcReply, JsonRpcRequest};
use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deadline for replies to server-initiated requests.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Aborts the stream reader when dropped, so an `open()` abandoned by a
/// timeout or cancellation cannot leave the `GET` socket behind.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Stream {
    endpoint: Url,
    _reader: AbortOnDrop,
}

/// MCP over server-sent events: a long-lived `GET` stream carries responses,
/// requests are `POST`ed to the endpoint announced on that stream.
pub struct SseTransport {
    server: String,
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    stream: Mutex<Option<Stream>>,
    pending: Pending,
    alive: Arc<AtomicBool>,
}

impl SseTransport {
    /// Describe the stream to open; nothing is sent until [`RpcTransport::open`].
    pub fn new(
        server: impl Into<String>,
        url: Url,
        headers: HeaderMap,
        client: reqwest::Client,
    ) -> Self {
        Self {
            server: server.into(),
            url,
            headers,
            client,
            stream: Mutex::new(None),
            pending: Pending::default(),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn endpoint(&self) -> Result<Url, RpcError> {
        self.stream
            .lock()
            .await
            .as_ref()
            .map(|s| s.endpoint.clone())
            .ok_or_else(|| RpcError::Closed("event stream not open".into()))
    }

    async fn post<T: Serialize>(&self, message: &T) -> Result<(), RpcError> {
        let endpoint = self.endpoint().await?;
        let response = self
            .client
            .post(endpoint)
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| {
                self.alive.store(false, Ordering::SeqCst);
                RpcError::Transport(format!("POST failed: {e}"))
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            self.alive.store(false, Ordering::SeqCst);
            return Err(RpcError::Closed(format!("endpoint rejected session ({status})")));
        }
        Err(RpcError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RpcTransport for SseTransport {
    async fn open(&self) -> Result<(), RpcError> {
        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("GET {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "GET {} returned {status}",
                self.url
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Result<Url, RpcError>>();
        let pending = self.pending.clone();
        let alive = self.alive.clone();
        let server = self.server.clone();
        let base = self.url.clone();
        let client = self.client.clone();
        let headers = self.headers.clone();
        let reader = AbortOnDrop(tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut endpoint: Option<Url> = None;
            let mut decoder = SseDecoder::new();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(server = %server, error = %e, "event stream read failed");
                        break;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => {
                            let path = event.data.trim();
                            let resolved = base.join(path).map_err(|e| {
                                RpcError::Protocol(format!("invalid endpoint '{path}': {e}"))
                            });
                            if let Ok(url) = &resolved {
                                endpoint = Some(url.clone());
                            }
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(resolved);
                            }
                        }
                        "message" => match Inbound::parse(&event.data) {
                            Ok(Inbound::Response(resp)) => pending.complete(resp).await,
                            Ok(Inbound::Request { id, method }) => {
                                debug!(server = %server, method = %method, "<- server request");
                                let Some(endpoint) = endpoint.clone() else {
                                    warn!(server = %server, "server request before endpoint event");
                                    continue;
                                };
                                let reply = JsonRpcReply::to_server_request(id, &method);
                                let sent = client
                                    .post(endpoint)
                                    .headers(headers.clone())
                                    .json(&reply)
                                    .timeout(REPLY_TIMEOUT)
                                    .send()
                                    .await;
                                if let Err(e) = sent {
                                    warn!(server = %server, error = %e, "failed to answer server request");
                                }
                            }
                            Ok(Inbound::Notification { method }) => {
                                debug!(server = %server, method = %method, "ignoring server notification");
                            }
                            Err(e) => debug!(server = %server, error = %e, "unparseable message event"),
                        },
                        other => debug!(server = %server, event = other, "ignoring event"),
                    }
                }
            }
            debug!(server = %server, "event stream ended");
            alive.store(false, Ordering::SeqCst);
            pending.fail_all().await;
        }));

        // Dropping `reader` on any early return, or when this future is
        // abandoned, aborts the stream task.
        let endpoint = match endpoint_rx.await {
            Ok(resolved) => resolved?,
            Err(_) => {
                return Err(RpcError::Closed(
                    "stream ended before an endpoint event".into(),
                ))
            }
        };

        info!(server = %self.server, %endpoint, "SSE stream open");
        *self.stream.lock().await = Some(Stream {
            endpoint,
            _reader: reader,
        });
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
            return Err(RpcError::Closed("event stream not open".into()));
        }
        let (id, rx) = self.pending.register().await;
        debug!(server = %self.server, id, method, "-> request");
        let sent = tokio::time::timeout(
            timeout,
            self.post(&JsonRpcRequest::new(id, method, params)),
        )
        .await
        .unwrap_or(Err(RpcError::Timeout(timeout)));
        if let Err(e) = sent {
            self.pending.forget(id).await;
            return Err(e);
        }
        self.pending.wait(id, rx, timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&self) {
        if let Some(stream) = self.stream.lock().await.take() {
            drop(stream);
            info!(server = %self.server, "SSE stream closed");
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.fail_all().await;
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn can_reconnect(&self) -> bool {
        true
    }
}
