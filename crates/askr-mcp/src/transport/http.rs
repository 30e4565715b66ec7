use super::{into_result, RpcTransport};
use crate::error::RpcError;
use crate::protocol::{Inbound, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse};
use crate::sse::{SseDecoder, SseEvent};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// MCP streamable HTTP: each message is one `POST`, answered either with a
/// JSON body or with a short event stream carrying the response.
pub struct HttpTransport {
    server: String,
    url: Url,
    headers: HeaderMap,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl HttpTransport {
    /// Describe the endpoint; nothing is sent until the first request.
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
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(false),
        }
    }

    async fn post<T: Serialize>(&self, message: &T) -> Result<reqwest::Response, RpcError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            self.alive.store(false, Ordering::SeqCst);
            RpcError::Transport(format!("POST {} failed: {e}", self.url))
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock().await;
            if current.as_deref() != Some(session) {
                debug!(server = %self.server, session, "MCP session assigned");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND && self.session_id.lock().await.is_some() {
            self.alive.store(false, Ordering::SeqCst);
            return Err(RpcError::Closed(format!("session expired ({status})")));
        }
        Err(RpcError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_response(
        &self,
        id: u64,
        response: reqwest::Response,
    ) -> Result<JsonRpcResponse, RpcError> {
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            return response
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| RpcError::Protocol(format!("invalid JSON-RPC body: {e}")));
        }

        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk =
                chunk.map_err(|e| RpcError::Transport(format!("response stream failed: {e}")))?;
            for event in decoder.push(&chunk) {
                if let Some(found) = self.on_event(id, &event).await {
                    return Ok(found);
                }
            }
        }
        if let Some(event) = decoder.finish() {
            if let Some(found) = self.on_event(id, &event).await {
                return Ok(found);
            }
        }
        Err(RpcError::Protocol(format!(
            "response stream ended without a reply to request {id}"
        )))
    }

    /// Handle one event of a response stream: the reply to `id` is returned,
    /// server requests are answered, anything else is skipped.
    async fn on_event(&self, id: u64, event: &SseEvent) -> Option<JsonRpcResponse> {
        if event.event != "message" {
            return None;
        }
        match Inbound::parse(&event.data) {
            Ok(Inbound::Response(resp)) if resp.id == Some(id) => Some(resp),
            Ok(Inbound::Request {
                id: request_id,
                method,
            }) => {
                debug!(server = %self.server, method = %method, "<- server request");
                let reply = JsonRpcReply::to_server_request(request_id, &method);
                if let Err(e) = self.post(&reply).await {
                    warn!(server = %self.server, error = %e, "failed to answer server request");
                }
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn open(&self) -> Result<(), RpcError> {
        *self.session_id.lock().await = None;
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
            return Err(RpcError::Closed("session not open".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(server = %self.server, id, method, "-> request");
        let exchange = async {
            let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;
            self.read_response(id, response).await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RpcError::Timeout(timeout)),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.post(&JsonRpcNotification::new(method, params))
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let Some(session) = self.session_id.lock().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, &session)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match result {
            Ok(resp) => info!(server = %self.server, status = %resp.status(), "MCP session closed"),
            Err(e) => warn!(server = %self.server, error = %e, "failed to close MCP session"),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn can_reconnect(&self) -> bool {
        true
    }
}
