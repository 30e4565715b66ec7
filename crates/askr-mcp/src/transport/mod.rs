//! JSON-RPC channels to tool servers, one implementation per transport kind.

mod http;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::error::RpcError;
use crate::protocol::JsonRpcResponse;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// A request/response channel to one tool server.
///
/// Implementations use interior mutability: one transport is shared by every
/// in-flight call of its connector.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Establish the channel (spawn the process, open the stream).
    async fn open(&self) -> Result<(), RpcError>;

    /// Send a request and wait up to `timeout` for its `result`.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError>;

    /// Tear the channel down. Idempotent.
    async fn close(&self);

    /// Whether the channel is still usable.
    fn is_alive(&self) -> bool;

    /// Whether a broken channel may be re-opened.
    fn can_reconnect(&self) -> bool;
}

/// Requests awaiting a response, keyed by JSON-RPC id.
#[derive(Clone, Default)]
pub(crate) struct Pending {
    waiters: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    next_id: Arc<AtomicU64>,
}

impl Pending {
    /// Allocate an id and a slot for its response.
    pub(crate) async fn register(&self) -> (u64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Route a response to its waiter. Unknown ids are dropped.
    pub(crate) async fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            return;
        };
        if let Some(tx) = self.waiters.lock().await.remove(&id) {
            let _ = tx.send(response);
        }
    }

    /// Drop the slot of an abandoned request.
    pub(crate) async fn forget(&self, id: u64) {
        self.waiters.lock().await.remove(&id);
    }

    /// Fail every waiter; their receivers observe a closed channel.
    pub(crate) async fn fail_all(&self) {
        self.waiters.lock().await.clear();
    }

    /// Wait for the response to `id`, giving up after `timeout`.
    pub(crate) async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(_)) => Err(RpcError::Closed("connection lost before response".into())),
            Err(_) => {
                self.forget(id).await;
                Err(RpcError::Timeout(timeout))
            }
        }
    }
}

/// Convert a response into its `result` or a server error.
pub(crate) fn into_result(response: JsonRpcResponse) -> Result<Value, RpcError> {
    if let Some(err) = response.error {
        return Err(RpcError::Server {
            code: err.code,
            message: err.message,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}
