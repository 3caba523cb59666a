use thiserror::Error;

/// Failures crossing the remote-service boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request or the body stream could not be completed.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The stream ended abnormally after some content had arrived.
    #[error("stream interrupted: {0}")]
    Interrupted(String),

    /// No chunk arrived within the configured idle window.
    #[error("stream stalled for {0}s")]
    Stalled(u64),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Short, user-facing description used in one-shot action notices.
    pub fn notice(&self) -> String {
        match self {
            TransportError::Transport(_) => {
                "Could not reach the analysis service. Is the backend running?".to_string()
            }
            TransportError::Status { status, body } if body.is_empty() => {
                format!("The analysis service rejected the request ({status}).")
            }
            TransportError::Status { status, body } => {
                format!("The analysis service rejected the request ({status}): {body}")
            }
            TransportError::Interrupted(_) | TransportError::Stalled(_) => {
                "The connection dropped before the answer finished.".to_string()
            }
            TransportError::Decode(_) => {
                "The analysis service sent a response this client could not read.".to_string()
            }
        }
    }
}

/// Rejections from the chat session manager.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a request is already in flight")]
    Busy,

    #[error("empty query")]
    EmptyQuery,

    #[error("chat session has been disposed")]
    Disposed,
}
