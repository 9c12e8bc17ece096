//! LSP transport abstraction (framed Content-Length messages).
use crate::lsp::error::Result;
use crate::lsp::types::Message;
use async_trait::async_trait;

/// Minimal async trait for LSP transport.
/// - `send` frames one message (Content-Length) and flushes it.
/// - `receive` waits for one complete frame and returns the decoded message.
#[async_trait]
pub trait LspTransport: Send {
    async fn send(&mut self, message: &Message) -> Result<()>;
    async fn receive(&mut self) -> Result<Message>;
}
