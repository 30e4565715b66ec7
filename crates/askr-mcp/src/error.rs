use std::time::Duration;

/// Failure of a single JSON-RPC exchange with a tool server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// No response arrived within the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// The channel is gone (process exited, stream ended, session expired).
    #[error("channel closed: {0}")]
    Closed(String),

    /// An HTTP exchange was answered with a non-success status. The
    /// connection itself is fine, so this never triggers a reconnect.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Sending or receiving failed at the transport level.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server sent something that is not valid MCP.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Whether the channel itself broke, as opposed to a slow or failing call.
    pub fn is_channel_broken(&self) -> bool {
        matches!(self, RpcError::Closed(_) | RpcError::Transport(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lost_channels_count_as_broken() {
        assert!(RpcError::Closed("eof".into()).is_channel_broken());
        assert!(RpcError::Transport("refused".into()).is_channel_broken());
        assert!(!RpcError::Status {
            status: 500,
            body: "tool crashed".into()
        }
        .is_channel_broken());
        assert!(!RpcError::Timeout(Duration::from_secs(1)).is_channel_broken());
    }
}
