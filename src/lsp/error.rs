use crate::lsp::types::RequestId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LspError>;

/// Everything that can go wrong between the harness and the server process.
#[derive(Debug, Error)]
pub enum LspError {
    /// A header line did not contain the `": "` separator.
    #[error("header line without \": \" delimiter: {line:?}")]
    MissingHeaderDelimiter { line: String },

    #[error("header block has no Content-Length")]
    MissingContentLength,

    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },

    /// The stream ended before the declared body length was read.
    #[error("stream ended after {received} of {expected} body bytes")]
    TruncatedStream { expected: usize, received: usize },

    /// The stream ended while the header block was being read.
    #[error("stream closed before a complete header block")]
    ConnectionClosed,

    #[error("message body is not valid JSON: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("not a JSON-RPC message: {0}")]
    UnexpectedMessage(String),

    #[error("response id mismatch: expected {expected}, got {}", display_id(.actual))]
    IdMismatch {
        expected: RequestId,
        actual: Option<RequestId>,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to take child {0}")]
    MissingPipe(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn display_id(id: &Option<RequestId>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "null".to_string(),
    }
}
